//! # stitch-gateway
//!
//! A Rust GraphQL gateway that serves one schema stitched together from a
//! local schema and any number of remote GraphQL services, backed by
//! per-request coalescing loaders for REST backends.
//!
//! ## Features
//!
//! - **Per-request loaders**: every request gets its own [`LoaderSet`]; identical
//!   concurrent backend calls collapse into one and results are memoized for
//!   the rest of the request
//! - **Schema stitching**: remote schemas are introspected and merged behind the
//!   local schema in a fixed precedence order, with extension fields resolved
//!   by delegating to other services
//! - **Identifier governance**: `id` fields are exposed as `internalID` or
//!   `publicID`, never bare
//! - **Authenticated delegation**: calls to services that require it carry the
//!   caller's token, fetched once per request
//! - **Pagination fan-out**: [`pagination::all_via_loader`] fetches every page of
//!   a paginated endpoint concurrently
//!
//! ## Main Components
//!
//! - [`Gateway`]: The main entry point for creating and running the gateway.
//! - [`GatewayBuilder`]: Configuration builder for the gateway.
//! - [`SchemaComposer`]: Builds the stitched schema from [`LocalSchema`] and
//!   [`RemoteService`]s.
//! - [`LoaderFactory`]: Creates the loaders of one request.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stitch_gateway::{ApiClient, Gateway, LoaderFactory, LocalSchema, RemoteService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = ApiClient::builder("https://api.example.com/api/v1").build();
//!
//!     let gateway = Gateway::builder()
//!         .local_schema(LocalSchema::new("type Query { ping: Boolean }"))
//!         .add_remote(RemoteService::new("auctions", "https://auctions.example.com/graphql"))
//!         .with_loader_factory(LoaderFactory::builder(catalog).build())
//!         .build()?;
//!
//!     let app = gateway.into_router();
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8888").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod dataloader;
pub mod delegation;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod id_transform;
pub mod introspection;
pub mod legacy;
pub mod link;
pub mod loaders;
pub mod middleware;
pub mod pagination;
pub mod plan;
pub mod runtime;
pub mod schema;
pub mod stitching;
pub mod types;

#[cfg(test)]
mod test_support;

pub use context::{RequestContext, RequestScope};
pub use dataloader::{Loader, RequestCache};
pub use error::{Error, FetchError, Result};
pub use fetch::{ApiClient, ApiResponse};
pub use gateway::{Gateway, GatewayBuilder};
pub use id_transform::IdTransform;
pub use link::{HttpLink, Link};
pub use loaders::{LoaderFactory, LoaderSet};
pub use middleware::LinkMiddleware;
pub use runtime::{Environment, ServeMux};
pub use stitching::{
    ComposedSchema, CompositionState, LocalSchema, RemoteService, SchemaComposer,
    StitchingResolver,
};
