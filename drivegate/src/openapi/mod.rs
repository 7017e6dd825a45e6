//! OpenAPI documentation.
//!
//! [`ApiDoc`] collects the handler annotations into one document, served as JSON at
//! `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, errors};

/// Firebase ID token bearer scheme
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "bearer".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Firebase Authentication ID token of the signed-in user:\n\n\
                            ```\nAuthorization: Bearer <id token>\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "drivegate",
        description = "Upload, serve and delete files stored in Google Drive."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::health::health,
        api::handlers::files::upload_file,
        api::handlers::files::public_download_file,
        api::handlers::files::download_file,
        api::handlers::files::delete_file,
    ),
    components(
        schemas(
            api::models::health::HealthResponse,
            api::models::files::UploadResponse,
            api::models::files::DeleteResponse,
            errors::ErrorBody,
        )
    ),
    tags(
        (name = "files", description = "Drive-backed file storage"),
        (name = "health", description = "Service liveness"),
    )
)]
pub struct ApiDoc;
