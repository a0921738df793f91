// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `client.rs`

use crate::azure::auth::StaticTokenCredential;
use crate::azure::client::TrafficManagerClient;
use crate::azure::{Endpoint, EndpointProperties, EndpointStatus};
use std::sync::Arc;

fn client() -> TrafficManagerClient {
    TrafficManagerClient::new(
        Arc::new(StaticTokenCredential("token".to_string())),
        "0000-sub".to_string(),
    )
}

#[test]
fn test_profile_url_shape() {
    let url = client().profile_url("fleet-rg", "fleet-profile-uid");
    assert_eq!(
        url,
        "https://management.azure.com/subscriptions/0000-sub/resourceGroups/fleet-rg\
         /providers/Microsoft.Network/trafficmanagerprofiles/fleet-profile-uid\
         ?api-version=2022-04-01"
    );
}

#[test]
fn test_endpoint_url_targets_azure_endpoint_subtype() {
    let url = client().endpoint_url("fleet-rg", "fleet-profile-uid", "fleet-uid#svc#member-1");
    assert!(url.contains("/trafficmanagerprofiles/fleet-profile-uid/azureEndpoints/"));
    assert!(url.ends_with("?api-version=2022-04-01"));
}

#[test]
fn test_with_base_url_trims_trailing_slash() {
    let client = client().with_base_url("https://management.usgovcloudapi.net/".to_string());
    let url = client.profile_url("rg", "p");
    assert!(url.starts_with("https://management.usgovcloudapi.net/subscriptions/"));
    assert!(!url.contains("net//"));
}

#[test]
fn test_endpoint_payload_serializes_to_arm_shape() {
    let endpoint = Endpoint {
        id: None,
        name: Some("fleet-uid#svc#member-1".to_string()),
        r#type: Some(crate::constants::AZURE_ENDPOINT_TYPE.to_string()),
        properties: Some(EndpointProperties {
            target_resource_id: Some("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/pip".to_string()),
            target: None,
            weight: Some(500),
            endpoint_status: Some(EndpointStatus::Enabled),
        }),
    };
    let value = serde_json::to_value(&endpoint).unwrap();
    assert_eq!(
        value["type"],
        "Microsoft.Network/trafficManagerProfiles/azureEndpoints"
    );
    assert_eq!(value["properties"]["endpointStatus"], "Enabled");
    assert_eq!(value["properties"]["weight"], 500);
    assert!(value["properties"]["targetResourceId"]
        .as_str()
        .unwrap()
        .ends_with("publicIPAddresses/pip"));
    assert!(value.get("id").is_none(), "unset id must be omitted from the payload");
}
