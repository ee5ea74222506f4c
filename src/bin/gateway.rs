use std::time::Duration;

use anyhow::Result;
use async_graphql::dynamic::{FieldFuture, FieldValue, ResolverContext};
use async_graphql::Value as GqlValue;
use serde_json::{json, Value};
use stitch_gateway::fetch::Params;
use stitch_gateway::pagination::{all_via_loader, PageOptions};
use stitch_gateway::schema::parent_object;
use stitch_gateway::{
    ApiClient, Environment, FetchError, Gateway, LoaderFactory, LocalSchema, RemoteService,
    RequestScope, StitchingResolver,
};
use tracing::info;

const DEFAULT_ADDR: &str = "127.0.0.1:8888";
const DEFAULT_CATALOG_API: &str = "http://localhost:3000/api/v1";

const LOCAL_SDL: &str = r#"
type Query {
  status: Status!
  artist(id: String!): Artist
  artworks(ids: [String!]!): [Artwork]!
  me: Me
}

type Status {
  ping: Boolean!
}

type Artist {
  "A type-specific ID likely used as a database ID."
  id: String!
  slug: String
  name: String
  artworks: [Artwork!]!
}

type Artwork {
  "A type-specific ID likely used as a database ID."
  id: String!
  title: String
}

type Me {
  "A type-specific ID likely used as a database ID."
  id: String!
  name: String
  email: String
}
"#;

const AUCTIONS_EXTENSION: &str = r#"
extend type Artist {
  auctionResults(first: Int): [AuctionResult!]
}
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let addr = env_or("GATEWAY_ADDR", DEFAULT_ADDR);
    let environment = Environment::from_name(&env_or("GATEWAY_ENV", "development"));
    let timeout = std::env::var("GATEWAY_TIMEOUT_MS")
        .ok()
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(stitch_gateway::fetch::DEFAULT_TIMEOUT);

    let mut catalog = ApiClient::builder(env_or("CATALOG_API_BASE", DEFAULT_CATALOG_API)).timeout(timeout);
    if let Ok(token) = std::env::var("CATALOG_APP_TOKEN") {
        catalog = catalog.app_token(token);
    }

    let mut builder = Gateway::builder()
        .local_schema(local_schema())
        .with_loader_factory(LoaderFactory::builder(catalog.build()).build())
        .with_environment(environment);

    if let Ok(url) = std::env::var("AUCTIONS_GRAPHQL_URL") {
        info!(%url, "stitching auctions service");
        builder = builder.add_remote(
            RemoteService::new("auctions", url)
                .requires_auth()
                .timeout(timeout)
                .extension(AUCTIONS_EXTENSION)
                .delegate(
                    "Artist",
                    "auctionResults",
                    StitchingResolver::new("auctions", "auctionResultsByArtist")
                        .fragment(&["internalID"])
                        .args(|parent, args| {
                            let mut out = args.clone();
                            if let Some(id) = parent.get("internalID") {
                                out.insert(async_graphql::Name::new("artistID"), id.clone());
                            }
                            out
                        }),
                ),
        );
    }

    info!("GraphQL gateway listening on http://{}/graphql", addr);
    builder.serve(addr).await?;

    Ok(())
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn local_schema() -> LocalSchema {
    LocalSchema::new(LOCAL_SDL)
        .resolver("Query", "status", |_| {
            FieldFuture::new(async { Ok(Some(FieldValue::value(to_value(json!({"ping": true}))?))) })
        })
        .resolver("Query", "artist", |ctx| {
            FieldFuture::new(async move {
                let id = ctx.args.try_get("id")?.string()?.to_string();
                let scope = ctx.data::<RequestScope>()?;
                let artist = scope
                    .loaders
                    .unauthenticated
                    .artist
                    .load(&id, &Params::new())
                    .await
                    .map_err(FetchError::into_field_error)?;
                Ok(Some(FieldValue::value(to_value(artist.body)?)))
            })
        })
        .resolver("Query", "artworks", |ctx| {
            FieldFuture::new(async move {
                let ids = ctx
                    .args
                    .try_get("ids")?
                    .list()?
                    .iter()
                    .map(|id| id.string().map(str::to_string))
                    .collect::<async_graphql::Result<Vec<_>>>()?;
                let scope = ctx.data::<RequestScope>()?;
                let found = scope
                    .loaders
                    .unauthenticated
                    .artworks_by_id
                    .load_many(ids.clone())
                    .await
                    .map_err(FetchError::into_field_error)?;
                let items = ids
                    .iter()
                    .map(|id| match found.get(id) {
                        Some(artwork) => to_value(artwork.clone()).map(FieldValue::value),
                        None => Ok(FieldValue::value(GqlValue::Null)),
                    })
                    .collect::<async_graphql::Result<Vec<_>>>()?;
                Ok(Some(FieldValue::list(items)))
            })
        })
        .resolver("Artist", "artworks", |ctx| {
            FieldFuture::new(async move {
                let Some(artist_id) = parent_string(&ctx, "id") else {
                    return Ok(Some(FieldValue::list(Vec::<FieldValue>::new())));
                };
                let scope = ctx.data::<RequestScope>()?;
                let mut params = Params::new();
                params.insert("artist_id".into(), Value::String(artist_id));
                let artworks = all_via_loader(
                    &scope.loaders.unauthenticated.artworks,
                    "",
                    &params,
                    PageOptions::default(),
                )
                .await
                .map_err(FetchError::into_field_error)?;
                let items = artworks
                    .into_iter()
                    .map(|artwork| to_value(artwork).map(FieldValue::value))
                    .collect::<async_graphql::Result<Vec<_>>>()?;
                Ok(Some(FieldValue::list(items)))
            })
        })
        .resolver("Query", "me", |ctx| {
            FieldFuture::new(async move {
                let scope = ctx.data::<RequestScope>()?;
                let Some(auth) = scope.loaders.authenticated.as_ref() else {
                    return Ok(None);
                };
                let me = auth
                    .me
                    .load("", &Params::new())
                    .await
                    .map_err(FetchError::into_field_error)?;
                Ok(Some(FieldValue::value(to_value(me.body)?)))
            })
        })
}

fn to_value(json: Value) -> async_graphql::Result<GqlValue> {
    Ok(GqlValue::from_json(json)?)
}

fn parent_string(ctx: &ResolverContext<'_>, field: &str) -> Option<String> {
    match parent_object(ctx)?.get(field)? {
        GqlValue::String(value) => Some(value.clone()),
        _ => None,
    }
}
