use crate::session::SessionStatus;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    Home,
    Chat,
    Projects,
    NewProject,
    ProjectDetail(String),
    Settings,
}

impl Route {
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.trim().trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["login"] => Some(Self::Login),
            ["register"] => Some(Self::Register),
            ["tabs"] | ["tabs", "home"] => Some(Self::Home),
            ["tabs", "chat"] => Some(Self::Chat),
            ["tabs", "projects"] => Some(Self::Projects),
            ["tabs", "projects", "new"] => Some(Self::NewProject),
            ["tabs", "projects", id] => Some(Self::ProjectDetail((*id).to_string())),
            ["tabs", "settings"] => Some(Self::Settings),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::Login => "/login".into(),
            Self::Register => "/register".into(),
            Self::Home => "/tabs/home".into(),
            Self::Chat => "/tabs/chat".into(),
            Self::Projects => "/tabs/projects".into(),
            Self::NewProject => "/tabs/projects/new".into(),
            Self::ProjectDetail(id) => format!("/tabs/projects/{id}"),
            Self::Settings => "/tabs/settings".into(),
        }
    }

    /// Sign-in screens are only reachable without a session.
    pub fn is_auth_screen(&self) -> bool {
        matches!(self, Self::Login | Self::Register)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Loading,
    Render(Route),
    Redirect(Route),
}

/// Where an unknown or root path leads.
pub fn landing(status: SessionStatus) -> Route {
    match status {
        SessionStatus::Authenticated => Route::Home,
        SessionStatus::Loading | SessionStatus::Unauthenticated => Route::Login,
    }
}

pub fn guard(path: &str, status: SessionStatus) -> RouteDecision {
    if status == SessionStatus::Loading {
        return RouteDecision::Loading;
    }
    let Some(route) = Route::parse(path) else {
        return RouteDecision::Redirect(landing(status));
    };
    let signed_in = status == SessionStatus::Authenticated;
    match (route.is_auth_screen(), signed_in) {
        (true, true) => RouteDecision::Redirect(Route::Home),
        (false, false) => RouteDecision::Redirect(Route::Login),
        _ if path.trim().trim_end_matches('/') == "/tabs" => RouteDecision::Redirect(Route::Home),
        _ => RouteDecision::Render(route),
    }
}
