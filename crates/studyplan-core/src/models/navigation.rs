use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One level of the navigation tree, as handed over by the navigation container.
///
/// Container bookkeeping this crate does not interpret (`key`, `type`,
/// `routeNames`, `stale`, ...) is preserved in `extra` so a restored tree is
/// identical to the saved one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationState {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Box<NavigationState>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Route {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            params: None,
            state: None,
            extra: Map::new(),
        }
    }

    pub fn with_state(mut self, state: NavigationState) -> Self {
        self.state = Some(Box::new(state));
        self
    }
}

impl NavigationState {
    /// State whose focused route is the last of `routes`.
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            index: routes.len().saturating_sub(1),
            routes,
            extra: Map::new(),
        }
    }

    /// Focused route at this level. An out-of-range index falls back to the last route.
    pub fn focused_route(&self) -> Option<&Route> {
        self.routes.get(self.index).or_else(|| self.routes.last())
    }

    /// Focused routes from the root down to the leaf.
    pub fn active_path(&self) -> Vec<&Route> {
        let mut path = Vec::new();
        let mut level = Some(self);
        while let Some(state) = level {
            let Some(route) = state.focused_route() else {
                break;
            };
            path.push(route);
            level = route.state.as_deref();
        }
        path
    }

    /// Name of the focused leaf route.
    pub fn active_route_name(&self) -> Option<&str> {
        self.active_path().last().map(|route| route.name.as_str())
    }
}

/// Persisted navigation tree plus the metadata it is validated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSnapshot {
    pub state: NavigationState,
    pub version: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
}
