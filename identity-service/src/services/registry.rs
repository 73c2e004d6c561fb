//! Role to capability mapping.
//!
//! Every bundle is a static list. Effective capabilities for a member are the
//! union of the baseline bundle (held by every authenticated member) and the
//! bundle of each role they hold.

use std::collections::BTreeSet;

use crate::models::{Capability, Role, RoleSet};

use Capability::*;

const BASELINE: &[Capability] = &[ProfileView, IntakeSubmit, MessagesSend, VerificationRequest];

const PATIENT: &[Capability] = &[AppointmentsBook, RecordsViewOwn, RxViewOwn];

const NURSE: &[Capability] = &[PatientsView, VitalsRecord, AppointmentsManage, RxDraft];

const PROVIDER: &[Capability] = &[PatientsView, AppointmentsManage, NotesWrite, RxDraft, RxSign];

const PHARMACY: &[Capability] = &[PharmacyQueueView, RxDispense];

const ADMIN: &[Capability] = &[
    ProfileView,
    IntakeSubmit,
    MessagesSend,
    VerificationRequest,
    AppointmentsBook,
    RecordsViewOwn,
    RxViewOwn,
    PatientsView,
    VitalsRecord,
    AppointmentsManage,
    NotesWrite,
    RxDraft,
    RxSign,
    PharmacyQueueView,
    RxDispense,
    MembersManage,
    VerificationsReview,
    AuditView,
];

/// The static bundle attached to one role.
pub fn bundle(role: Role) -> &'static [Capability] {
    match role {
        Role::Unverified => BASELINE,
        Role::Patient => PATIENT,
        Role::Nurse => NURSE,
        Role::Provider => PROVIDER,
        Role::Pharmacy => PHARMACY,
        Role::Admin => ADMIN,
    }
}

/// Effective capabilities of a role set. Never fails; an empty set yields the baseline.
pub fn capabilities_of(roles: &RoleSet) -> BTreeSet<Capability> {
    let mut caps: BTreeSet<Capability> = BASELINE.iter().copied().collect();
    for role in roles.iter() {
        caps.extend(bundle(role).iter().copied());
    }
    caps
}

pub fn has_any(roles: &RoleSet, required: &[Capability]) -> bool {
    let caps = capabilities_of(roles);
    required.iter().any(|c| caps.contains(c))
}

pub fn has_all(roles: &RoleSet, required: &[Capability]) -> bool {
    let caps = capabilities_of(roles);
    required.iter().all(|c| caps.contains(c))
}

/// Capabilities from `required` the role set lacks, in the given order.
pub fn missing(roles: &RoleSet, required: &[Capability]) -> Vec<Capability> {
    let caps = capabilities_of(roles);
    required
        .iter()
        .filter(|c| !caps.contains(c))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subset(mask: usize) -> RoleSet {
        Role::ALL
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, r)| *r)
            .collect()
    }

    #[test]
    fn admin_is_a_superset_of_every_role() {
        let admin = capabilities_of(&RoleSet::single(Role::Admin));
        for role in Role::ALL {
            for cap in bundle(role) {
                assert!(admin.contains(cap), "admin lacks {} from {}", cap, role);
            }
        }
    }

    #[test]
    fn admin_reaches_every_capability() {
        let admin = capabilities_of(&RoleSet::single(Role::Admin));
        assert_eq!(admin.len(), Capability::ALL.len());
    }

    #[test]
    fn every_capability_belongs_to_some_bundle() {
        for cap in Capability::ALL {
            assert!(
                Role::ALL.iter().any(|r| bundle(*r).contains(&cap)),
                "{} is unreachable",
                cap
            );
        }
    }

    #[test]
    fn union_distributes_over_every_pair_of_role_sets() {
        let count = 1 << Role::ALL.len();
        for a in 0..count {
            for b in 0..count {
                let (ra, rb) = (subset(a), subset(b));
                let mut expected = capabilities_of(&ra);
                expected.extend(capabilities_of(&rb));
                assert_eq!(capabilities_of(&ra.union(&rb)), expected);
            }
        }
    }

    #[test]
    fn empty_role_set_yields_the_baseline() {
        let caps = capabilities_of(&RoleSet::new());
        let expected: BTreeSet<Capability> = BASELINE.iter().copied().collect();
        assert_eq!(caps, expected);
        assert_eq!(caps, capabilities_of(&RoleSet::single(Role::Unverified)));
    }

    #[test]
    fn patient_cannot_sign_prescriptions() {
        let patient = RoleSet::single(Role::Patient);
        assert!(!has_any(&patient, &[RxSign]));
        assert!(has_all(&patient, &[ProfileView, AppointmentsBook]));
        assert_eq!(missing(&patient, &[RxSign, RxViewOwn]), vec![RxSign]);
    }

    #[test]
    fn multi_role_member_combines_bundles() {
        let roles = RoleSet::from([Role::Nurse, Role::Pharmacy]);
        assert!(has_all(&roles, &[VitalsRecord, RxDispense]));
        assert!(!has_any(&roles, &[RxSign]));
    }
}
