// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `endpoints.rs`

#[cfg(test)]
mod tests {
    use crate::azure::mock::MockTrafficManager;
    use crate::azure::{Endpoint, EndpointProperties, EndpointStatus, TrafficManagerApi};
    use crate::constants::AZURE_ENDPOINT_TYPE;
    use crate::crd::{
        ClusterStatus, ExportedObjectReference, InternalServiceExport, InternalServiceExportSpec,
        ServiceImport, ServiceImportSpec, ServiceImportStatus, TrafficManagerBackend,
        TrafficManagerBackendRef, TrafficManagerBackendSpec, TrafficManagerProfileRef,
    };
    use crate::reconcilers::endpoints::{
        cleanup_endpoints, converge_endpoints, derive_endpoints, endpoints_equal, validate_export,
        Derivation, DerivedEndpoints,
    };
    use std::sync::Arc;

    const BACKEND_UID: &str = "b1f7a6e2-9d4c-4f21-8f11-6f0f8e1c9a55";
    const RESOURCE_GROUP: &str = "fleet-rg";
    const PROFILE_NAME: &str = "fleet-profile-uid";

    fn backend(weight: i64) -> TrafficManagerBackend {
        let mut backend = TrafficManagerBackend::new(
            "app",
            TrafficManagerBackendSpec {
                profile: TrafficManagerProfileRef {
                    name: "app-profile".to_string(),
                },
                backend: TrafficManagerBackendRef {
                    name: "app-svc".to_string(),
                },
                weight: Some(weight),
            },
        );
        backend.metadata.namespace = Some("work".to_string());
        backend.metadata.uid = Some(BACKEND_UID.to_string());
        backend
    }

    fn import(clusters: &[&str]) -> ServiceImport {
        let mut import = ServiceImport::new("app-svc", ServiceImportSpec::default());
        import.metadata.namespace = Some("work".to_string());
        import.status = Some(ServiceImportStatus {
            clusters: clusters
                .iter()
                .map(|c| ClusterStatus {
                    cluster: (*c).to_string(),
                })
                .collect(),
        });
        import
    }

    fn export(cluster: &str, weight: Option<i64>) -> Arc<InternalServiceExport> {
        Arc::new(InternalServiceExport::new(
            &format!("work-app-svc-{cluster}"),
            InternalServiceExportSpec {
                r#type: "LoadBalancer".to_string(),
                is_internal_load_balancer: false,
                public_ip_resource_id: Some(format!(
                    "/subscriptions/s/resourceGroups/member/providers/Microsoft.Network/publicIPAddresses/pip-{cluster}"
                )),
                is_dns_label_configured: true,
                weight,
                service_reference: ExportedObjectReference {
                    cluster_id: cluster.to_string(),
                    namespace: "work".to_string(),
                    name: "app-svc".to_string(),
                    namespaced_name: "work/app-svc".to_string(),
                },
            },
        ))
    }

    fn endpoint_name(cluster: &str) -> String {
        format!("fleet-{BACKEND_UID}#app-svc#{cluster}")
    }

    fn derived(
        backend: &TrafficManagerBackend,
        import: &ServiceImport,
        exports: &[Arc<InternalServiceExport>],
    ) -> DerivedEndpoints {
        match derive_endpoints(backend, import, exports) {
            Derivation::Derived(derived) => derived,
            Derivation::MissingExport { cluster } => {
                panic!("unexpected missing export for {cluster}")
            }
        }
    }

    // ========================================================================
    // Eligibility
    // ========================================================================

    #[test]
    fn test_validate_export_accepts_public_lb_with_dns_label() {
        assert!(validate_export(&export("member-1", None)).is_ok());
    }

    #[test]
    fn test_validate_export_rejections() {
        let mut wrong_type = (*export("c", None)).clone();
        wrong_type.spec.r#type = "ClusterIP".to_string();
        assert!(validate_export(&wrong_type)
            .unwrap_err()
            .contains("unsupported service type"));

        let mut internal = (*export("c", None)).clone();
        internal.spec.is_internal_load_balancer = true;
        assert!(validate_export(&internal)
            .unwrap_err()
            .contains("internal load balancer"));

        let mut no_ip = (*export("c", None)).clone();
        no_ip.spec.public_ip_resource_id = None;
        assert!(validate_export(&no_ip)
            .unwrap_err()
            .contains("configuring public IP"));

        let mut no_dns = (*export("c", None)).clone();
        no_dns.spec.is_dns_label_configured = false;
        assert!(validate_export(&no_dns)
            .unwrap_err()
            .contains("DNS label is not configured"));
    }

    // ========================================================================
    // Derivation and weight redistribution
    // ========================================================================

    #[test]
    fn test_single_export_receives_full_backend_weight() {
        let derived = derived(&backend(500), &import(&["member-1"]), &[export("member-1", Some(7))]);
        assert_eq!(derived.desired.len(), 1);
        let endpoint = &derived.desired[&endpoint_name("member-1")];
        assert_eq!(
            endpoint.endpoint.properties.as_ref().unwrap().weight,
            Some(500)
        );
        assert_eq!(endpoint.from_cluster.cluster, "member-1");
        assert_eq!(endpoint.from_cluster.weight, Some(7));
    }

    #[test]
    fn test_two_exports_ceiling_redistribution() {
        let derived = derived(
            &backend(500),
            &import(&["member-1", "member-2"]),
            &[export("member-1", Some(100)), export("member-2", Some(200))],
        );
        let weight = |cluster: &str| {
            derived.desired[&endpoint_name(cluster)]
                .endpoint
                .properties
                .as_ref()
                .unwrap()
                .weight
                .unwrap()
        };
        assert_eq!(weight("member-1"), 167, "ceil(500*100/300)");
        assert_eq!(weight("member-2"), 334, "ceil(500*200/300)");
    }

    #[test]
    fn test_effective_weight_sum_bounds() {
        let derived = derived(
            &backend(100),
            &import(&["member-1", "member-2", "member-3"]),
            &[
                export("member-1", Some(1)),
                export("member-2", Some(1)),
                export("member-3", Some(1)),
            ],
        );
        let sum: i64 = derived
            .desired
            .values()
            .map(|d| d.endpoint.properties.as_ref().unwrap().weight.unwrap())
            .sum();
        assert!(sum >= 100, "ceiling must never drop below the backend weight");
        assert!(sum <= 100 + 3, "over-sum is bounded by the endpoint count");
    }

    #[test]
    fn test_unset_export_weight_defaults_to_one() {
        let derived = derived(
            &backend(300),
            &import(&["member-1", "member-2"]),
            &[export("member-1", None), export("member-2", None)],
        );
        for desired in derived.desired.values() {
            assert_eq!(desired.from_cluster.weight, Some(1));
            assert_eq!(
                desired.endpoint.properties.as_ref().unwrap().weight,
                Some(150)
            );
        }
    }

    #[test]
    fn test_zero_weight_exports_contribute_no_endpoint() {
        let derived = derived(
            &backend(500),
            &import(&["member-1", "member-2"]),
            &[export("member-1", Some(0)), export("member-2", Some(100))],
        );
        assert_eq!(derived.desired.len(), 1);
        assert!(derived.desired.contains_key(&endpoint_name("member-2")));
        assert!(derived.invalid_by_cluster.is_empty());

        let all_zero = derived_all_zero();
        assert!(all_zero.desired.is_empty(), "all-zero weights mean no endpoints");
    }

    fn derived_all_zero() -> DerivedEndpoints {
        derived(
            &backend(500),
            &import(&["member-1", "member-2"]),
            &[export("member-1", Some(0)), export("member-2", Some(0))],
        )
    }

    #[test]
    fn test_missing_export_signals_stale_import() {
        let result = derive_endpoints(
            &backend(500),
            &import(&["member-1", "member-2"]),
            &[export("member-1", None)],
        );
        match result {
            Derivation::MissingExport { cluster } => assert_eq!(cluster, "member-2"),
            Derivation::Derived(_) => panic!("expected MissingExport"),
        }
    }

    #[test]
    fn test_ineligible_export_goes_to_invalid_map() {
        let mut no_dns = (*export("member-2", None)).clone();
        no_dns.spec.is_dns_label_configured = false;

        let derived = derived(
            &backend(500),
            &import(&["member-1", "member-2"]),
            &[export("member-1", None), Arc::new(no_dns)],
        );
        assert_eq!(derived.desired.len(), 1);
        assert_eq!(
            derived.desired[&endpoint_name("member-1")]
                .endpoint
                .properties
                .as_ref()
                .unwrap()
                .weight,
            Some(500),
            "ineligible exports contribute no weight, so member-1 takes it all"
        );
        assert!(derived.invalid_by_cluster["member-2"].contains("DNS label"));
    }

    #[test]
    fn test_desired_endpoint_shape() {
        let derived = derived(&backend(1), &import(&["Member-East"]), &[export("Member-East", None)]);
        let (name, desired) = derived.desired.iter().next().unwrap();
        assert_eq!(*name, name.to_lowercase(), "endpoint names are stored lowercased");
        assert_eq!(desired.endpoint.r#type.as_deref(), Some(AZURE_ENDPOINT_TYPE));
        let properties = desired.endpoint.properties.as_ref().unwrap();
        assert_eq!(
            properties.endpoint_status,
            Some(EndpointStatus::Enabled)
        );
        assert!(properties
            .target_resource_id
            .as_deref()
            .unwrap()
            .contains("publicIPAddresses/pip-Member-East"));
    }

    // ========================================================================
    // Endpoint equality
    // ========================================================================

    fn cloud_endpoint(name: &str, weight: i64) -> Endpoint {
        Endpoint {
            id: Some(format!("/subscriptions/s/.../{name}")),
            name: Some(name.to_string()),
            r#type: Some("Microsoft.Network/trafficManagerProfiles/AzureEndpoints".to_string()),
            properties: Some(EndpointProperties {
                target_resource_id: Some(
                    "/SUBSCRIPTIONS/S/resourceGroups/member/providers/Microsoft.Network/publicIPAddresses/pip-member-1"
                        .to_string(),
                ),
                target: Some("pip-member-1.cloudapp.azure.com".to_string()),
                weight: Some(weight),
                endpoint_status: Some(EndpointStatus::Enabled),
            }),
        }
    }

    #[test]
    fn test_endpoints_equal_ignores_case_and_server_fields() {
        let derived = derived(&backend(500), &import(&["member-1"]), &[export("member-1", None)]);
        let desired = &derived.desired[&endpoint_name("member-1")].endpoint;
        let current = cloud_endpoint(&endpoint_name("member-1"), 500);
        assert!(endpoints_equal(&current, desired));
    }

    #[test]
    fn test_endpoints_differ_on_weight_and_status() {
        let derived = derived(&backend(500), &import(&["member-1"]), &[export("member-1", None)]);
        let desired = &derived.desired[&endpoint_name("member-1")].endpoint;

        let stale_weight = cloud_endpoint(&endpoint_name("member-1"), 250);
        assert!(!endpoints_equal(&stale_weight, desired));

        let mut disabled = cloud_endpoint(&endpoint_name("member-1"), 500);
        disabled.properties.as_mut().unwrap().endpoint_status = Some(EndpointStatus::Disabled);
        assert!(!endpoints_equal(&disabled, desired));

        let mut no_properties = cloud_endpoint(&endpoint_name("member-1"), 500);
        no_properties.properties = None;
        assert!(!endpoints_equal(&no_properties, desired));
    }

    // ========================================================================
    // Convergence
    // ========================================================================

    async fn converge(
        cloud: &MockTrafficManager,
        backend: &TrafficManagerBackend,
        import: &ServiceImport,
        exports: &[Arc<InternalServiceExport>],
    ) -> crate::reconcilers::endpoints::ConvergeOutcome {
        let profile = cloud.get_profile(RESOURCE_GROUP, PROFILE_NAME).await.unwrap();
        let derived = derived(backend, import, exports);
        converge_endpoints(cloud, RESOURCE_GROUP, backend, &profile, derived.desired)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_converge_creates_missing_endpoints() {
        let cloud = MockTrafficManager::new();
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![]);

        let backend = backend(500);
        let outcome = converge(
            &cloud,
            &backend,
            &import(&["member-1", "member-2"]),
            &[export("member-1", Some(100)), export("member-2", Some(200))],
        )
        .await;

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.created.len(), 2);
        assert!(outcome.bad_endpoints.is_empty());
        // Accepted list is sorted and carries the cloud resource id.
        assert_eq!(outcome.accepted[0].name, endpoint_name("member-1"));
        assert!(outcome.accepted[0].resource_id.contains("azureEndpoints"));
        assert_eq!(outcome.accepted[0].weight, Some(167));
        assert_eq!(
            outcome.accepted[0].from.as_ref().unwrap().cluster,
            "member-1"
        );
        assert_eq!(cloud.endpoints(RESOURCE_GROUP, PROFILE_NAME).len(), 2);
    }

    #[tokio::test]
    async fn test_converge_is_idempotent() {
        let cloud = MockTrafficManager::new();
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![]);

        let backend = backend(500);
        let imports = import(&["member-1", "member-2"]);
        let exports = [export("member-1", Some(100)), export("member-2", Some(200))];

        let first = converge(&cloud, &backend, &imports, &exports).await;
        let second = converge(&cloud, &backend, &imports, &exports).await;

        assert_eq!(first.accepted, second.accepted);
        assert!(second.created.is_empty(), "second pass must not touch the cloud");
        assert_eq!(cloud.endpoints(RESOURCE_GROUP, PROFILE_NAME).len(), 2);
    }

    #[tokio::test]
    async fn test_converge_deletes_orphans_and_spares_foreign_endpoints() {
        let cloud = MockTrafficManager::new();
        let orphan = endpoint_name("member-gone");
        let foreign = "fleet-other-backend-uid#other-svc#member-1";
        cloud.insert_profile(
            RESOURCE_GROUP,
            PROFILE_NAME,
            vec![cloud_endpoint(&orphan, 42), cloud_endpoint(foreign, 13)],
        );

        let backend = backend(500);
        let outcome = converge(&cloud, &backend, &import(&["member-1"]), &[export("member-1", None)]).await;

        assert_eq!(outcome.accepted.len(), 1);
        let remaining: Vec<String> = cloud
            .endpoints(RESOURCE_GROUP, PROFILE_NAME)
            .into_iter()
            .filter_map(|e| e.name)
            .collect();
        assert!(remaining.iter().any(|n| n == foreign), "foreign endpoints are untouchable");
        assert!(!remaining.iter().any(|n| *n == orphan));
    }

    #[tokio::test]
    async fn test_converge_updates_changed_weight() {
        let cloud = MockTrafficManager::new();
        let name = endpoint_name("member-1");
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![cloud_endpoint(&name, 250)]);

        let backend = backend(500);
        let outcome = converge(&cloud, &backend, &import(&["member-1"]), &[export("member-1", None)]).await;

        assert_eq!(outcome.created, vec![name.clone()]);
        let stored = &cloud.endpoints(RESOURCE_GROUP, PROFILE_NAME)[0];
        assert_eq!(stored.properties.as_ref().unwrap().weight, Some(500));
    }

    #[tokio::test]
    async fn test_converge_collects_bad_endpoints_and_continues() {
        let cloud = MockTrafficManager::new();
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![]);
        cloud.fail_put(
            &endpoint_name("member-1"),
            400,
            Some("BadRequest"),
            "target resource is not a public IP",
        );

        let backend = backend(500);
        let profile = cloud.get_profile(RESOURCE_GROUP, PROFILE_NAME).await.unwrap();
        let derived = derived(
            &backend,
            &import(&["member-1", "member-2"]),
            &[export("member-1", None), export("member-2", None)],
        );
        let outcome = converge_endpoints(&cloud, RESOURCE_GROUP, &backend, &profile, derived.desired)
            .await
            .unwrap();

        assert_eq!(outcome.bad_endpoints.len(), 1);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].name, endpoint_name("member-2"));
    }

    #[tokio::test]
    async fn test_converge_aborts_on_throttling() {
        let cloud = MockTrafficManager::new();
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![]);
        cloud.fail_put(&endpoint_name("member-1"), 429, None, "slow down");

        let backend = backend(500);
        let profile = cloud.get_profile(RESOURCE_GROUP, PROFILE_NAME).await.unwrap();
        let derived = derived(&backend, &import(&["member-1"]), &[export("member-1", None)]);
        let err = converge_endpoints(&cloud, RESOURCE_GROUP, &backend, &profile, derived.desired)
            .await
            .unwrap_err();
        assert!(err.message.contains("Failed to create or update"));
        assert!(err.source.is_throttled());
    }

    #[tokio::test]
    async fn test_converge_aborts_on_orphan_delete_failure() {
        let cloud = MockTrafficManager::new();
        let orphan = endpoint_name("member-gone");
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![cloud_endpoint(&orphan, 1)]);
        cloud.fail_delete(&orphan, 500, "internal error");

        let backend = backend(500);
        let profile = cloud.get_profile(RESOURCE_GROUP, PROFILE_NAME).await.unwrap();
        let derived = derived(&backend, &import(&["member-1"]), &[export("member-1", None)]);
        let err = converge_endpoints(&cloud, RESOURCE_GROUP, &backend, &profile, derived.desired)
            .await
            .unwrap_err();
        assert!(err.message.contains("Failed to cleanup"));
    }

    #[tokio::test]
    async fn test_converge_tolerates_delete_race() {
        let cloud = MockTrafficManager::new();
        let orphan = endpoint_name("member-gone");
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![cloud_endpoint(&orphan, 1)]);
        // Someone else already deleted it between the GET and our DELETE.
        cloud.fail_delete(&orphan, 404, "not found");

        let backend = backend(500);
        let outcome = converge(&cloud, &backend, &import(&["member-1"]), &[export("member-1", None)]).await;
        assert_eq!(outcome.accepted.len(), 1);
    }

    // ========================================================================
    // Teardown cleanup
    // ========================================================================

    #[tokio::test]
    async fn test_cleanup_deletes_only_owned_endpoints() {
        let cloud = MockTrafficManager::new();
        let foreign = "fleet-other-backend-uid#other-svc#member-1";
        cloud.insert_profile(
            RESOURCE_GROUP,
            PROFILE_NAME,
            vec![
                cloud_endpoint(&endpoint_name("member-1"), 1),
                cloud_endpoint(&endpoint_name("member-2"), 1),
                cloud_endpoint(&endpoint_name("member-3"), 1),
                cloud_endpoint(foreign, 1),
            ],
        );

        let backend = backend(500);
        let profile = cloud.get_profile(RESOURCE_GROUP, PROFILE_NAME).await.unwrap();
        cleanup_endpoints(&cloud, RESOURCE_GROUP, &backend, &profile)
            .await
            .unwrap();

        let remaining = cloud.endpoints(RESOURCE_GROUP, PROFILE_NAME);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name.as_deref(), Some(foreign));
        assert_eq!(cloud.deleted().len(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_not_found() {
        let cloud = MockTrafficManager::new();
        let name = endpoint_name("member-1");
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![cloud_endpoint(&name, 1)]);
        cloud.fail_delete(&name, 404, "already gone");

        let backend = backend(500);
        let profile = cloud.get_profile(RESOURCE_GROUP, PROFILE_NAME).await.unwrap();
        assert!(cleanup_endpoints(&cloud, RESOURCE_GROUP, &backend, &profile)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_propagates_first_error() {
        let cloud = MockTrafficManager::new();
        let name = endpoint_name("member-1");
        cloud.insert_profile(RESOURCE_GROUP, PROFILE_NAME, vec![cloud_endpoint(&name, 1)]);
        cloud.fail_delete(&name, 500, "internal error");

        let backend = backend(500);
        let profile = cloud.get_profile(RESOURCE_GROUP, PROFILE_NAME).await.unwrap();
        let err = cleanup_endpoints(&cloud, RESOURCE_GROUP, &backend, &profile)
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_with_no_properties_is_a_noop() {
        let cloud = MockTrafficManager::new();
        let backend = backend(500);
        let profile = crate::azure::Profile {
            id: None,
            name: Some(PROFILE_NAME.to_string()),
            properties: None,
        };
        assert!(cleanup_endpoints(&cloud, RESOURCE_GROUP, &backend, &profile)
            .await
            .is_ok());
    }
}
