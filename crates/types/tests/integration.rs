//! Integration tests for types

#[cfg(test)]
mod tests {
    use vessel_types::*;

    #[test]
    fn test_car_info_roundtrip_through_json() {
        let info = CarInfo {
            id: PackageId::from("abc-p2-1.0"),
            name: "p2".into(),
            version: "1.0".into(),
            repo: "github.com/acme/pkgs".into(),
            signer: "signer".into(),
            constraints: host_constraints(),
            inputs: vec![],
            dependencies: vec![CarDependency {
                id: PackageId::from("def-p1-0.1"),
                repo: "github.com/acme/pkgs".into(),
                signer: "signer".into(),
            }],
            signature: "sig".into(),
        };

        let json = serde_json::to_string(&info).unwrap();
        let back: CarInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
        assert_eq!(
            back.dependency_ids().map(PackageId::as_str).collect::<Vec<_>>(),
            vec!["def-p1-0.1"]
        );
    }

    #[test]
    fn test_package_info_tolerates_missing_optional_fields() {
        let info: PackageInfo =
            serde_json::from_str(r#"{"id":"abc-p1-0.1","name":"p1","version":"0.1"}"#).unwrap();
        assert!(info.runtime_deps.is_empty());
        assert!(info.inputs.is_empty());
        assert_eq!(info.retained_deps().count(), 0);
    }

    #[test]
    fn test_install_report_success() {
        let mut report = InstallReport::default();
        assert!(report.is_success());
        report.skipped.push(PackageId::from("x-y-1"));
        assert!(!report.is_success());
        assert!(InstallState::Skipped.is_terminal());
        assert!(!InstallState::Building.is_terminal());
    }
}
