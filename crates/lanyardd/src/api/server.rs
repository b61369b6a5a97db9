use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use lanyard::{AddressPool, Driver, EndpointRequest, Outcome};
use lanyard_common::{ErrorKind, LanyardError};

use super::{
    ActivateResponse, CapabilitiesResponse, CreateEndpointRequest, CreateEndpointResponse,
    CreateNetworkRequest, DiscoveryRequest, Empty, EndpointInterface, EndpointOperInfoResponse,
    EndpointRequestIds, ErrorResponse, InterfaceName, IpamData, JoinRequest, JoinResponse,
    NetworkRequest,
};

type AppState = Arc<Driver>;

/// Error returned to the runtime as `{"Err": "..."}`.
#[derive(Debug)]
pub struct ApiError(LanyardError);

impl From<LanyardError> for ApiError {
    fn from(e: LanyardError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InvalidInput | ErrorKind::ConfigurationInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ResourceConflict => StatusCode::CONFLICT,
            ErrorKind::DeviceCreation
            | ErrorKind::RoutingPlane
            | ErrorKind::HostEnvironment
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                err: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn app(driver: AppState) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_oper_info))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint))
        .route("/NetworkDriver.Join", post(join))
        .route("/NetworkDriver.Leave", post(leave))
        .route("/NetworkDriver.DiscoverNew", post(discover_new))
        .route("/NetworkDriver.DiscoverDelete", post(discover_delete))
        .with_state(driver)
}

fn log_degraded<T>(op: &'static str, outcome: &Outcome<T>) {
    for degraded in &outcome.degraded {
        tracing::warn!(op, %degraded, "Completed with degraded side effect");
    }
}

async fn activate() -> Json<ActivateResponse> {
    Json(ActivateResponse {
        implements: vec!["NetworkDriver"],
    })
}

async fn capabilities(State(driver): State<AppState>) -> Json<CapabilitiesResponse> {
    let scope = driver.capabilities().scope.as_str();
    Json(CapabilitiesResponse {
        scope,
        connectivity_scope: scope,
    })
}

async fn create_network(
    State(driver): State<AppState>,
    Json(req): Json<CreateNetworkRequest>,
) -> ApiResult<Empty> {
    let pools = |data: Option<Vec<IpamData>>| {
        data.unwrap_or_default()
            .iter()
            .map(|d| {
                tracing::trace!(
                    address_space = %d.address_space,
                    aux_addresses = d.aux_addresses.len(),
                    pool = %d.pool,
                    "IPAM data"
                );
                AddressPool::try_from(d)
            })
            .collect::<Result<Vec<_>, _>>()
    };
    let ipv4 = pools(req.ipv4_data)?;
    let ipv6 = pools(req.ipv6_data)?;
    let options = req.options.unwrap_or_default();

    let outcome = driver
        .create_network(&req.network_id, &options, &ipv4, &ipv6)
        .await?;
    log_degraded("CreateNetwork", &outcome);
    Ok(Json(Empty::default()))
}

async fn delete_network(
    State(driver): State<AppState>,
    Json(req): Json<NetworkRequest>,
) -> ApiResult<Empty> {
    let outcome = driver.delete_network(&req.network_id).await?;
    log_degraded("DeleteNetwork", &outcome);
    Ok(Json(Empty::default()))
}

async fn create_endpoint(
    State(driver): State<AppState>,
    Json(req): Json<CreateEndpointRequest>,
) -> ApiResult<CreateEndpointResponse> {
    let request = match &req.interface {
        Some(iface) => EndpointRequest::try_from(iface)?,
        None => EndpointRequest::default(),
    };
    let generated = driver
        .create_endpoint(&req.network_id, &req.endpoint_id, request)
        .await?;

    // Only a generated MAC is reported back, the runtime rejects echoes
    Ok(Json(CreateEndpointResponse {
        interface: generated.map(|mac| EndpointInterface {
            mac_address: mac.to_string().to_lowercase(),
            ..EndpointInterface::default()
        }),
    }))
}

async fn endpoint_oper_info(
    State(driver): State<AppState>,
    Json(req): Json<EndpointRequestIds>,
) -> ApiResult<EndpointOperInfoResponse> {
    let value = driver
        .endpoint_oper_info(&req.network_id, &req.endpoint_id)
        .await?;
    Ok(Json(EndpointOperInfoResponse { value }))
}

async fn delete_endpoint(
    State(driver): State<AppState>,
    Json(req): Json<EndpointRequestIds>,
) -> ApiResult<Empty> {
    let outcome = driver
        .delete_endpoint(&req.network_id, &req.endpoint_id)
        .await?;
    log_degraded("DeleteEndpoint", &outcome);
    Ok(Json(Empty::default()))
}

async fn join(
    State(driver): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> ApiResult<JoinResponse> {
    let info = driver
        .join(&req.network_id, &req.endpoint_id, &req.sandbox_key)
        .await?;
    Ok(Json(JoinResponse {
        interface_name: InterfaceName {
            src_name: info.src_name,
            dst_prefix: info.dst_prefix,
        },
        gateway: info.gateway.map(|gw| gw.to_string()),
        gateway_ipv6: info.gateway_v6.map(|gw| gw.to_string()),
    }))
}

async fn leave(
    State(driver): State<AppState>,
    Json(req): Json<EndpointRequestIds>,
) -> ApiResult<Empty> {
    driver.leave(&req.network_id, &req.endpoint_id).await?;
    Ok(Json(Empty::default()))
}

async fn discover_new(
    State(driver): State<AppState>,
    Json(req): Json<DiscoveryRequest>,
) -> ApiResult<Empty> {
    driver.discover_new(req.discovery_type).await?;
    Ok(Json(Empty::default()))
}

async fn discover_delete(
    State(driver): State<AppState>,
    Json(req): Json<DiscoveryRequest>,
) -> ApiResult<Empty> {
    driver.discover_delete(req.discovery_type).await?;
    Ok(Json(Empty::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanyard_common::LanyardResult;
    use lanyard_network::{
        DriverKind, IpNet, LinkMode, LinkOps, RoutingBackend, RoutingManager, RoutingProvider,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::IpAddr;

    #[derive(Default)]
    struct Links(Mutex<HashMap<String, u32>>);

    #[async_trait]
    impl LinkOps for Links {
        async fn link_index(&self, name: &str) -> LanyardResult<Option<u32>> {
            Ok(self.0.lock().get(name).copied())
        }
        async fn add_link(&self, name: &str, _: u32, _: LinkMode) -> LanyardResult<()> {
            self.0.lock().insert(name.to_string(), 42);
            Ok(())
        }
        async fn delete_link(&self, name: &str) -> LanyardResult<()> {
            self.0
                .lock()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| LanyardError::InterfaceNotFound { name: name.to_string() })
        }
        async fn add_route(&self, _: IpNet, _: IpAddr, _: u32) -> LanyardResult<()> {
            Ok(())
        }
        async fn delete_route(&self, _: IpNet, _: IpAddr, _: u32) -> LanyardResult<()> {
            Ok(())
        }
    }

    struct NoRouting;

    impl RoutingProvider for NoRouting {
        fn connect(
            &self,
            backend: RoutingBackend,
            _: &str,
        ) -> LanyardResult<Arc<dyn RoutingManager>> {
            Err(LanyardError::Routing {
                backend: backend.as_str(),
                message: "not in tests".to_string(),
            })
        }
    }

    fn state() -> AppState {
        let links = Links::default();
        links.0.lock().insert("eth0".to_string(), 1);
        Arc::new(Driver::new(DriverKind::Macvlan, Arc::new(links), Arc::new(NoRouting)))
    }

    fn body<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Json<T> {
        Json(serde_json::from_value(value).unwrap())
    }

    #[tokio::test]
    async fn activate_and_capabilities() {
        let Json(resp) = activate().await;
        assert_eq!(resp.implements, vec!["NetworkDriver"]);
        let Json(caps) = capabilities(State(state())).await;
        assert_eq!(caps.scope, "local");
    }

    #[tokio::test]
    async fn plugin_round_trip() {
        let driver = state();
        create_network(
            State(Arc::clone(&driver)),
            body(json!({
                "NetworkID": "n1",
                "Options": {
                    "com.docker.network.enable_ipv6": false,
                    "com.docker.network.generic": {
                        "host_iface": "eth0",
                        "macvlan_mode": "bridge"
                    }
                },
                "IPv4Data": [{
                    "AddressSpace": "",
                    "Pool": "10.0.0.0/24",
                    "Gateway": "10.0.0.1/24"
                }],
                "IPv6Data": []
            })),
        )
        .await
        .unwrap();

        let Json(created) = create_endpoint(
            State(Arc::clone(&driver)),
            body(json!({
                "NetworkID": "n1",
                "EndpointID": "e1",
                "Interface": { "Address": "10.0.0.5/24" }
            })),
        )
        .await
        .unwrap();
        assert_eq!(
            serde_json::to_value(created).unwrap(),
            json!({ "Interface": { "MacAddress": "02:42:0a:00:00:05" } })
        );

        let Json(joined) = join(
            State(Arc::clone(&driver)),
            body(json!({
                "NetworkID": "n1",
                "EndpointID": "e1",
                "SandboxKey": "/var/run/docker/netns/abc"
            })),
        )
        .await
        .unwrap();
        assert_eq!(joined.gateway.as_deref(), Some("10.0.0.1"));
        assert_eq!(joined.interface_name.dst_prefix, "eth");

        let ids = || body::<EndpointRequestIds>(json!({ "NetworkID": "n1", "EndpointID": "e1" }));
        let Json(info) = endpoint_oper_info(State(Arc::clone(&driver)), ids()).await.unwrap();
        assert!(info.value.is_empty());
        leave(State(Arc::clone(&driver)), ids()).await.unwrap();
        delete_endpoint(State(Arc::clone(&driver)), ids()).await.unwrap();
        delete_network(State(Arc::clone(&driver)), body(json!({ "NetworkID": "n1" })))
            .await
            .unwrap();
        assert!(driver.network_ids().is_empty());
    }

    #[tokio::test]
    async fn errors_use_err_field() {
        let err = delete_network(State(state()), body(json!({ "NetworkID": "missing" })))
            .await
            .unwrap_err();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let err = create_network(
            State(state()),
            body(json!({ "NetworkID": "n1", "Options": {}, "IPv4Data": [] })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, LanyardError::MissingHostInterface { .. }));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_body_shape() {
        let body = serde_json::to_value(ErrorResponse {
            err: "Network not found: n1".to_string(),
        })
        .unwrap();
        assert_eq!(body, json!({ "Err": "Network not found: n1" }));
    }

    #[tokio::test]
    async fn discovery_is_accepted() {
        let driver = state();
        discover_new(
            State(Arc::clone(&driver)),
            body(json!({ "DiscoveryType": 1, "DiscoveryData": {} })),
        )
        .await
        .unwrap();
        discover_delete(State(driver), body(json!({ "DiscoveryType": 1 })))
            .await
            .unwrap();
    }
}
