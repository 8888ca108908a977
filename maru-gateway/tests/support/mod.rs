//! Shared helpers for gateway integration tests.

#![allow(dead_code)]

use maru_gateway::{Gateway, GatewayConfig};
use maru_test_utils::fixtures;
use maru_test_utils::{CachePolicyRegistry, ScriptedTransport};
use std::sync::Arc;

/// Gateway over `transport` with the built-in policies.
pub fn builtin_gateway(transport: &Arc<ScriptedTransport>) -> Gateway {
    gateway(transport, fixtures::test_config(), None)
}

/// Gateway over `transport` with only `registry`'s policies.
pub fn gateway_with_policies(
    transport: &Arc<ScriptedTransport>,
    registry: CachePolicyRegistry,
) -> Gateway {
    gateway(transport, fixtures::test_config(), Some(registry))
}

pub fn gateway(
    transport: &Arc<ScriptedTransport>,
    config: GatewayConfig,
    registry: Option<CachePolicyRegistry>,
) -> Gateway {
    let mut builder = Gateway::builder(config).with_transport(transport.clone());
    if let Some(registry) = registry {
        builder = builder.with_policies(registry);
    }
    builder.build().expect("test gateway should build")
}

/// Yield until `count` reads are in flight.
pub async fn wait_for_flights(gateway: &Gateway, count: usize) {
    for _ in 0..1_000 {
        if gateway.in_flight() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("expected {count} in-flight reads, found {}", gateway.in_flight());
}
