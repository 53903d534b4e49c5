//! OpenAPI document for the registry API, served at `/openapi.json`.
use crate::api::{
    membranes, namespaces, system,
    types::{
        ErrorResponse, HealthStatus, MembraneListResponse, MembraneRegisterRequest,
        MembraneRegistered, NamespaceCreateRequest, NamespaceCreated, NamespaceListResponse,
        NamespacePatchRequest, ReadinessStatus, RouteResponse, StatsResponse, StatusResponse,
    },
};
use crate::model::{MembraneView, Namespace, RegistryCounts};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "membrane-registry",
        version = "v1",
        description = "Namespace registry for membranes"
    ),
    paths(
        system::health,
        system::ready,
        system::stats,
        namespaces::create_namespace,
        namespaces::list_namespaces,
        namespaces::get_namespace,
        namespaces::patch_namespace,
        namespaces::route_between,
        membranes::register_membrane,
        membranes::discover_membranes,
        membranes::heartbeat,
        membranes::get_membrane,
        membranes::reactivate_membrane,
        membranes::deregister_membrane
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        ReadinessStatus,
        StatsResponse,
        StatusResponse,
        NamespaceCreateRequest,
        NamespaceCreated,
        NamespaceListResponse,
        NamespacePatchRequest,
        Namespace,
        MembraneRegisterRequest,
        MembraneRegistered,
        MembraneListResponse,
        MembraneView,
        RegistryCounts,
        RouteResponse
    )),
    tags(
        (name = "system", description = "Probes and counters"),
        (name = "namespaces", description = "Namespace management and routing"),
        (name = "membranes", description = "Membrane lifecycle and discovery")
    )
)]
pub struct ApiDoc;

pub(crate) async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}
