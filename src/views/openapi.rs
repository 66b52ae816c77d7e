use utoipa::OpenApi;
use utoipa::openapi::PathItem;
use utoipa::openapi::path::Operation;

use super::auth;
use super::layout;
use super::pallets;
use super::state;
use crate::error::InternalError;

fn path_item_operations_mut(path_item: &mut PathItem) -> Vec<&mut Operation> {
    let mut operations = Vec::new();
    operations.extend(path_item.get.as_mut());
    operations.extend(path_item.put.as_mut());
    operations.extend(path_item.post.as_mut());
    operations.extend(path_item.delete.as_mut());
    operations.extend(path_item.options.as_mut());
    operations.extend(path_item.head.as_mut());
    operations.extend(path_item.patch.as_mut());
    operations.extend(path_item.trace.as_mut());
    operations
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Palletmap",
        description = "JSON endpoints of the warehouse pallet map",
        license(name = "LGPL", url = "https://www.gnu.org/licenses/lgpl-3.0.html"),
    ),
    paths(
        super::health,
        super::version,
        layout::get_layout,
        layout::save_layout,
        layout::reset_layout,
        state::get_state,
        state::save_state,
        pallets::list,
        pallets::create,
        pallets::delete,
        pallets::set_articles,
        pallets::search,
    ),
    components(schemas(InternalError)),
    tags(
        (name = "service", description = "Liveness and version"),
        (name = "layout", description = "The layout document drawn on the canvas"),
        (name = "state", description = "The opaque state owned by the client"),
        (name = "pallets", description = "Pallets and the articles they hold"),
    )
)]
pub struct OpenApiRoot;

impl OpenApiRoot {
    // Remove the operation_id that defaults to the endpoint function name
    fn remove_operation_id(openapi: &mut utoipa::openapi::OpenApi) {
        for (_, endpoint) in openapi.paths.paths.iter_mut() {
            for operation in path_item_operations_mut(endpoint) {
                operation.operation_id = None;
            }
        }
    }

    /// Documents the 401 answered by every `/api` route once the session gate is enabled
    fn add_session_responses(openapi: &mut utoipa::openapi::OpenApi) {
        let unauthorized = utoipa::openapi::ResponseBuilder::new()
            .description(format!(
                "No valid `{}` cookie while a password is configured",
                auth::SESSION_COOKIE
            ))
            .content(
                "application/json",
                utoipa::openapi::ContentBuilder::new()
                    .schema(Some(utoipa::openapi::Ref::from_schema_name("InternalError")))
                    .build(),
            )
            .build();
        for (path, endpoint) in openapi.paths.paths.iter_mut() {
            if !path.starts_with("/api/") {
                continue;
            }
            for operation in path_item_operations_mut(endpoint) {
                operation
                    .responses
                    .responses
                    .entry("401".to_owned())
                    .or_insert_with(|| unauthorized.clone().into());
            }
        }
    }

    pub fn build_openapi() -> utoipa::openapi::OpenApi {
        let mut openapi = OpenApiRoot::openapi();
        Self::add_session_responses(&mut openapi);
        Self::remove_operation_id(&mut openapi);
        openapi
    }
}
