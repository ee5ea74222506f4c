//! Loader factory: one fresh, typed set of loaders per inbound request

use crate::context::{
    RequestContext, ACCESS_TOKEN_HEADER, FORWARDED_FOR_HEADER, REQUEST_ID_HEADER, USER_ID_HEADER,
};
use crate::dataloader::{loader_headers, IdBatchLoader, Loader, MutationLoader};
use crate::fetch::ApiClient;
use crate::legacy::{LegacyClient, LegacyLoaderBridge};
use async_graphql::dataloader::DataLoader;
use http::Method;
use std::sync::Arc;

/// Loaders usable without a caller token
pub struct UnauthenticatedLoaders {
    pub artist: Loader,
    pub artists: Loader,
    pub artwork: Loader,
    pub artworks: Loader,
    /// Batches `artwork` lookups issued by sibling resolvers into one call
    pub artworks_by_id: DataLoader<IdBatchLoader>,
    pub partner: Loader,
    pub sale: Loader,
    pub sales: Loader,
}

/// Loaders acting on behalf of the caller. Only built when the request
/// carries an access token.
pub struct AuthenticatedLoaders {
    pub me: Loader,
    pub saved_artworks: Loader,
    /// Exchanges the caller's access token for a short lived token accepted
    /// by remote GraphQL services.
    pub delegation_token: Loader,
    pub save_artwork: MutationLoader,
}

/// The loaders of one request.
///
/// Never cloned across requests: every cache inside lives and dies with the
/// request that created it.
pub struct LoaderSet {
    pub unauthenticated: UnauthenticatedLoaders,
    pub authenticated: Option<AuthenticatedLoaders>,
    pub legacy: LegacyLoaderBridge,
}

impl LoaderSet {
    /// Token loader used by link middleware, when the caller is signed in
    pub fn delegation_token(&self) -> Option<&Loader> {
        self.authenticated.as_ref().map(|auth| &auth.delegation_token)
    }
}

impl std::fmt::Debug for LoaderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderSet")
            .field("authenticated", &self.authenticated.is_some())
            .field("legacy", &self.legacy)
            .finish()
    }
}

/// Builds [`LoaderSet`]s bound to a caller identity.
///
/// # Example
///
/// ```rust,no_run
/// use stitch_gateway::fetch::ApiClient;
/// use stitch_gateway::loaders::LoaderFactory;
///
/// let factory = LoaderFactory::builder(ApiClient::builder("https://catalog.internal/api/v1").build())
///     .build();
/// let loaders = factory.create_loaders(Some("token"), Some("user-1"), "req-1");
/// assert!(loaders.authenticated.is_some());
/// ```
#[derive(Clone)]
pub struct LoaderFactory {
    catalog: ApiClient,
    legacy: Arc<dyn LegacyClient>,
}

impl LoaderFactory {
    pub fn builder(catalog: ApiClient) -> LoaderFactoryBuilder {
        LoaderFactoryBuilder {
            catalog,
            legacy: None,
        }
    }

    /// Create loaders for the caller described by `ctx`
    pub fn for_context(&self, ctx: &RequestContext) -> LoaderSet {
        let forwarded_for = Some(ctx.x_forwarded_for.as_str()).filter(|v| !v.is_empty());
        self.build(
            ctx.access_token.as_deref(),
            ctx.user_id.as_deref(),
            &ctx.request_id,
            forwarded_for,
        )
    }

    /// Create a fresh set of loaders bound to one caller and request
    pub fn create_loaders(
        &self,
        access_token: Option<&str>,
        user_id: Option<&str>,
        request_id: &str,
    ) -> LoaderSet {
        self.build(access_token, user_id, request_id, None)
    }

    fn build(
        &self,
        access_token: Option<&str>,
        user_id: Option<&str>,
        request_id: &str,
        forwarded_for: Option<&str>,
    ) -> LoaderSet {
        let public_headers = loader_headers(&[
            (REQUEST_ID_HEADER, Some(request_id)),
            (FORWARDED_FOR_HEADER, forwarded_for),
        ]);
        let api = &self.catalog;
        let public = |name: &'static str, prefix: &str| {
            Loader::new(name, prefix, api.clone(), public_headers.clone())
        };

        let unauthenticated = UnauthenticatedLoaders {
            artist: public("artist", "artist"),
            artists: public("artists", "artists"),
            artwork: public("artwork", "artwork"),
            artworks: public("artworks", "artworks"),
            artworks_by_id: DataLoader::new(
                IdBatchLoader::new("artworks", api.clone(), public_headers.clone()),
                tokio::spawn,
            ),
            partner: public("partner", "partner"),
            sale: public("sale", "sale"),
            sales: public("sales", "sales"),
        };

        let authenticated = access_token.map(|token| {
            let headers = loader_headers(&[
                (REQUEST_ID_HEADER, Some(request_id)),
                (FORWARDED_FOR_HEADER, forwarded_for),
                (ACCESS_TOKEN_HEADER, Some(token)),
                (USER_ID_HEADER, user_id),
            ]);
            let private = |name: &'static str, prefix: &str| {
                Loader::new(name, prefix, api.clone(), headers.clone())
            };
            AuthenticatedLoaders {
                me: private("me", "me"),
                saved_artworks: private("saved_artworks", "collection/saved-artwork/artworks"),
                delegation_token: private("delegation_token", "me/token"),
                save_artwork: MutationLoader::new(
                    "save_artwork",
                    "collection/saved-artwork/artwork",
                    Method::POST,
                    api.clone(),
                    headers.clone(),
                ),
            }
        });

        tracing::trace!(
            request_id,
            authenticated = authenticated.is_some(),
            "created loaders"
        );

        LoaderSet {
            unauthenticated,
            authenticated,
            legacy: LegacyLoaderBridge::new(Arc::clone(&self.legacy)),
        }
    }
}

impl std::fmt::Debug for LoaderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderFactory")
            .field("catalog", &self.catalog)
            .finish()
    }
}

/// Builder for a [`LoaderFactory`].
pub struct LoaderFactoryBuilder {
    catalog: ApiClient,
    legacy: Option<Arc<dyn LegacyClient>>,
}

impl LoaderFactoryBuilder {
    /// Older client bridged into every [`LoaderSet`]. Defaults to a
    /// [`HttpLegacyClient`](crate::legacy::HttpLegacyClient) on the catalog base URL.
    pub fn legacy_client(mut self, client: Arc<dyn LegacyClient>) -> Self {
        self.legacy = Some(client);
        self
    }

    pub fn build(self) -> LoaderFactory {
        let legacy = self.legacy.unwrap_or_else(|| {
            Arc::new(
                crate::legacy::HttpLegacyClient::new(self.catalog.base_url())
                    .timeout(self.catalog.timeout()),
            )
        });
        LoaderFactory {
            catalog: self.catalog,
            legacy,
        }
    }
}
