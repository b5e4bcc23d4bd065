// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! OpenAPI document and Swagger UI page.

use axum::response::Html;
use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// OpenAPI document of the provisioner.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "dbt server provisioner",
        version = env!("CARGO_PKG_VERSION"),
        description = "Provisions dbt API servers in Kubernetes and registers them with Airflow."
    ),
    paths(
        super::handlers::create_deployment,
        super::handlers::list_deployments,
        super::handlers::get_deployment,
        super::handlers::update_deployment,
        super::handlers::delete_deployment,
        super::handlers::service_status,
        super::health::liveness,
        super::health::readiness,
        super::health::startup,
    ),
    components(schemas(
        super::error::ErrorBody,
        super::handlers::ServiceStatus,
        super::health::ProbeStatus,
        crate::types::DeploymentRequest,
        crate::types::DeploymentUpdate,
        crate::types::DeploymentRecord,
        crate::types::Phase,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "Deployments", description = "dbt API server lifecycle"),
        (name = "Service", description = "Service information"),
        (name = "Health", description = "Kubernetes probes"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// Swagger UI loading `/openapi.json`.
const SWAGGER_UI: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>dbt server provisioner</title>
  <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: "/openapi.json", dom_id: "#swagger-ui" });
    };
  </script>
</body>
</html>
"##;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub async fn docs() -> Html<&'static str> {
    Html(SWAGGER_UI)
}
