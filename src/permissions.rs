//! Entitlement Gate
//!
//! Every inbound command passes an ordered chain of guards before a handler
//! runs:
//! - **Registered**: user exists and is active
//! - **Admin**: user's role is admin
//! - **Feature**: feature is enabled globally and granted to the user
//! - **Optional**: public commands; resolves the user when possible, never rejects
//!
//! The first failing guard produces the rejection. A lookup failure denies
//! (fail closed) for every guard except `Optional`.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BotError, BotResult};
use crate::mode::UserId;
use crate::users::{Feature, UserDirectory, UserRecord};

/// How long successful lookups stay cached
const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(30);

/// A single authorization predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Registered,
    Admin,
    Feature(Feature),
    Optional,
}

/// Access requirement of a command; expands to guards in fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Anyone, personalized if registered
    Public,
    /// Any active registered user
    Registered,
    /// Active user holding the feature
    Feature(Feature),
    /// Active admin
    Admin,
}

impl Access {
    pub fn guards(&self) -> Vec<Guard> {
        match self {
            Self::Public => vec![Guard::Optional],
            Self::Registered => vec![Guard::Registered],
            Self::Feature(f) => vec![Guard::Registered, Guard::Feature(*f)],
            Self::Admin => vec![Guard::Registered, Guard::Admin],
        }
    }
}

/// Resolved request context handed to handlers after the gate passes
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: UserId,
    pub user: Option<UserRecord>,
}

impl RequestContext {
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin())
    }

    pub fn display_name(&self) -> String {
        self.user
            .as_ref()
            .and_then(|u| u.username.clone())
            .unwrap_or_else(|| format!("user {}", self.user_id))
    }
}

/// Lookup outcome; `Unavailable` is distinct from "unknown user"
enum Lookup {
    Found(UserRecord),
    Unknown,
    Unavailable,
}

pub struct EntitlementGate {
    directory: Arc<dyn UserDirectory>,
    cache: Cache<UserId, UserRecord>,
}

impl EntitlementGate {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(LOOKUP_CACHE_TTL)
            .build();
        Self { directory, cache }
    }

    /// Run the guard chain for `access`
    pub async fn authorize(&self, user_id: UserId, access: Access) -> BotResult<RequestContext> {
        let lookup = self.lookup(user_id).await;
        let mut ctx = RequestContext {
            user_id,
            user: None,
        };

        for guard in access.guards() {
            match guard {
                Guard::Optional => {
                    if let Lookup::Found(user) = &lookup {
                        ctx.user = Some(user.clone());
                    }
                }
                Guard::Registered => match &lookup {
                    Lookup::Found(user) if user.is_active => ctx.user = Some(user.clone()),
                    Lookup::Found(_) => {
                        return Err(reject(
                            user_id,
                            guard,
                            "Your account is awaiting activation by an admin.",
                        ))
                    }
                    Lookup::Unknown => {
                        return Err(reject(
                            user_id,
                            guard,
                            "You are not registered. Send /register to request access.",
                        ))
                    }
                    Lookup::Unavailable => return Err(unavailable(user_id)),
                },
                Guard::Admin => {
                    if !ctx.is_admin() {
                        return Err(reject(user_id, guard, "This command is for admins only."));
                    }
                }
                Guard::Feature(feature) => self.check_feature(&ctx, feature).await?,
            }
        }

        Ok(ctx)
    }

    async fn check_feature(&self, ctx: &RequestContext, feature: Feature) -> BotResult<()> {
        let enabled = match self.directory.is_feature_enabled(feature).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Feature lookup for {} failed: {}", feature, e);
                return Err(unavailable(ctx.user_id));
            }
        };
        if !enabled {
            return Err(reject(
                ctx.user_id,
                Guard::Feature(feature),
                &format!("The {} feature is currently disabled.", feature),
            ));
        }

        let granted = ctx.user.as_ref().is_some_and(|u| u.has_feature(feature));
        if !granted {
            return Err(reject(
                ctx.user_id,
                Guard::Feature(feature),
                &format!(
                    "You do not have access to the {} feature. Ask an admin to grant it.",
                    feature
                ),
            ));
        }
        Ok(())
    }

    async fn lookup(&self, user_id: UserId) -> Lookup {
        if let Some(user) = self.cache.get(&user_id).await {
            return Lookup::Found(user);
        }

        if !self.directory.is_healthy() {
            warn!("User directory unhealthy, denying lookup for {}", user_id);
            return Lookup::Unavailable;
        }

        match self.directory.resolve_user(user_id).await {
            Ok(Some(user)) => {
                self.cache.insert(user_id, user.clone()).await;
                Lookup::Found(user)
            }
            Ok(None) => Lookup::Unknown,
            Err(e) => {
                warn!("User lookup for {} failed: {}", user_id, e);
                Lookup::Unavailable
            }
        }
    }

    /// Drop the cached record after grants or role changes
    pub async fn invalidate(&self, user_id: UserId) {
        self.cache.invalidate(&user_id).await;
    }
}

fn reject(user_id: UserId, guard: Guard, message: &str) -> BotError {
    debug!("Guard {:?} rejected user {}", guard, user_id);
    BotError::denied(message)
}

fn unavailable(user_id: UserId) -> BotError {
    debug!("Denying user {} while the directory is unavailable", user_id);
    BotError::denied("Cannot verify your access right now, please try again shortly.")
}
