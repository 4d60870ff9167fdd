use utoipa::OpenApi;
use crate::modules::jobs::dto::*;
use crate::modules::jobs::model::{ContentBundle, JobStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::jobs::handler::create_job,
        crate::modules::jobs::handler::list_jobs,
        crate::modules::jobs::handler::get_job,
        crate::modules::jobs::handler::update_job_content,
        crate::modules::jobs::handler::retry_job,
        crate::modules::jobs::handler::toggle_public,
        crate::modules::jobs::handler::get_public_job,
    ),
    components(
        schemas(
            CreateJobRequest, UpdateContentRequest, JobResponse, PublishResponse,
            ContentBundle, JobStatus,
        )
    ),
    tags(
        (name = "Jobs", description = "Video to content jobs")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

use utoipa::Modify;
use utoipa::openapi::security::{SecurityScheme, HttpAuthScheme, HttpBuilder};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
