//! Property tests: relationship fields stay mutually consistent under any
//! sequence of link, unlink, clear and delete operations.

use kvorm_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn one_to_many_matches_model(
        size in 1usize..8,
        ops in link_sequence_strategy(1, 40),
    ) {
        let test_db = TestDatabase::memory();
        let people = scenarios::register_family(&test_db).unwrap();
        let mut harness = FamilyHarness::new(people, size).unwrap();

        for op in &ops {
            harness.apply(op).unwrap();
            if let Err(message) = harness.verify() {
                return Err(TestCaseError::fail(format!("after {op:?}: {message}")));
            }
        }
        prop_assert!(check_relations(&test_db).is_ok());
        prop_assert!(check_counters(&test_db).is_ok());
        prop_assert_eq!(harness.people().count().unwrap(), harness.pool().len() as u64);
    }

    #[test]
    fn one_to_one_matches_model(
        size in 1usize..8,
        ops in link_sequence_strategy(1, 40),
    ) {
        let test_db = TestDatabase::memory();
        let partners = scenarios::register_couples(&test_db).unwrap();
        let mut harness = CoupleHarness::new(partners, size).unwrap();

        for op in &ops {
            harness.apply(op).unwrap();
            if let Err(message) = harness.verify() {
                return Err(TestCaseError::fail(format!("after {op:?}: {message}")));
            }
        }
        prop_assert!(check_relations(&test_db).is_ok());
        prop_assert!(check_counters(&test_db).is_ok());
        prop_assert!(check_audit_sequence(&test_db).is_ok());
    }

    #[test]
    fn many_to_many_is_symmetric(
        links in prop::collection::vec((0usize..5, 0usize..5, any::<bool>()), 1..40),
    ) {
        let test_db = TestDatabase::memory();
        let (students, courses) = scenarios::register_school(&test_db).unwrap();
        let pool_s: Vec<_> = (0..5)
            .map(|i| students.create([("name", format!("s{i}").into())]).unwrap())
            .collect();
        let pool_c: Vec<_> = (0..5).map(|_| courses.create_empty().unwrap()).collect();

        for (s, c, add) in links {
            if add {
                pool_s[s].add_ref("courses", &pool_c[c]).unwrap();
            } else {
                pool_c[c].remove_ref("students", &pool_s[s]).unwrap();
            }
        }
        if let Err(message) = check_relations(&test_db) {
            return Err(TestCaseError::fail(message));
        }
        prop_assert!(check_audit_sequence(&test_db).is_ok());
    }

    #[test]
    fn rejected_writes_are_never_audited(
        emails in prop::collection::vec("[a-z@.]{1,12}", 1..20),
    ) {
        let test_db = TestDatabase::memory();
        let users = test_db.register_type(scenarios::user_schema()).unwrap();
        let user = users.create_empty().unwrap();
        let mut current = kvorm_codec::Value::Null;
        let mut expected_audit = test_db.audit_len().unwrap();

        for email in emails {
            match user.set("email", email.as_str()) {
                Ok(()) => {
                    prop_assert!(email.contains('@'));
                    if current != kvorm_codec::Value::from(email.as_str()) {
                        expected_audit += 1;
                    }
                    current = kvorm_codec::Value::from(email.as_str());
                }
                Err(err) => {
                    prop_assert!(err.is_permission_denied());
                    prop_assert!(!email.contains('@'));
                }
            }
            prop_assert_eq!(user.get("email").unwrap(), current.clone());
            prop_assert_eq!(test_db.audit_len().unwrap(), expected_audit);
        }
    }
}
