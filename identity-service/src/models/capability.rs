//! Capability identifiers.
//!
//! A capability names one permitted action category. Capabilities are flat:
//! none implies another. The set is fixed at compile time; role bundles live
//! in [`crate::services::registry`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "profile:view")]
    ProfileView,
    #[serde(rename = "intake:submit")]
    IntakeSubmit,
    #[serde(rename = "messages:send")]
    MessagesSend,
    #[serde(rename = "verification:request")]
    VerificationRequest,
    #[serde(rename = "appointments:book")]
    AppointmentsBook,
    #[serde(rename = "records:view_own")]
    RecordsViewOwn,
    #[serde(rename = "rx:view_own")]
    RxViewOwn,
    #[serde(rename = "patients:view")]
    PatientsView,
    #[serde(rename = "vitals:record")]
    VitalsRecord,
    #[serde(rename = "appointments:manage")]
    AppointmentsManage,
    #[serde(rename = "notes:write")]
    NotesWrite,
    #[serde(rename = "rx:draft")]
    RxDraft,
    #[serde(rename = "rx:sign")]
    RxSign,
    #[serde(rename = "pharmacy:queue_view")]
    PharmacyQueueView,
    #[serde(rename = "rx:dispense")]
    RxDispense,
    #[serde(rename = "admin:members_manage")]
    MembersManage,
    #[serde(rename = "admin:verifications_review")]
    VerificationsReview,
    #[serde(rename = "admin:audit_view")]
    AuditView,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 18] = [
        Capability::ProfileView,
        Capability::IntakeSubmit,
        Capability::MessagesSend,
        Capability::VerificationRequest,
        Capability::AppointmentsBook,
        Capability::RecordsViewOwn,
        Capability::RxViewOwn,
        Capability::PatientsView,
        Capability::VitalsRecord,
        Capability::AppointmentsManage,
        Capability::NotesWrite,
        Capability::RxDraft,
        Capability::RxSign,
        Capability::PharmacyQueueView,
        Capability::RxDispense,
        Capability::MembersManage,
        Capability::VerificationsReview,
        Capability::AuditView,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ProfileView => "profile:view",
            Capability::IntakeSubmit => "intake:submit",
            Capability::MessagesSend => "messages:send",
            Capability::VerificationRequest => "verification:request",
            Capability::AppointmentsBook => "appointments:book",
            Capability::RecordsViewOwn => "records:view_own",
            Capability::RxViewOwn => "rx:view_own",
            Capability::PatientsView => "patients:view",
            Capability::VitalsRecord => "vitals:record",
            Capability::AppointmentsManage => "appointments:manage",
            Capability::NotesWrite => "notes:write",
            Capability::RxDraft => "rx:draft",
            Capability::RxSign => "rx:sign",
            Capability::PharmacyQueueView => "pharmacy:queue_view",
            Capability::RxDispense => "rx:dispense",
            Capability::MembersManage => "admin:members_manage",
            Capability::VerificationsReview => "admin:verifications_review",
            Capability::AuditView => "admin:audit_view",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_round_trip_through_from_str() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(ids.len(), Capability::ALL.len());
    }

    #[test]
    fn serde_uses_string_ids() {
        let json = serde_json::to_string(&Capability::RxSign).unwrap();
        assert_eq!(json, "\"rx:sign\"");
        let back: Capability = serde_json::from_str("\"pharmacy:queue_view\"").unwrap();
        assert_eq!(back, Capability::PharmacyQueueView);
    }

    #[test]
    fn unknown_id_is_rejected() {
        assert!("rx:sign_everything".parse::<Capability>().is_err());
    }
}
