use chrono::{DateTime, Local, Utc};
use magicapp_core::chat::{ChatMessage, MessageRole};
use magicapp_core::models::{LinkedAccount, User};
use magicapp_core::preferences::ThemeMode;
use magicapp_core::project::Project;
use magicapp_core::session::SessionEvent;

pub trait RoleLabel {
    fn role_label(&self) -> &'static str;
}

impl RoleLabel for ChatMessage {
    fn role_label(&self) -> &'static str {
        match self.role {
            MessageRole::System => "System",
            MessageRole::User => "You",
            MessageRole::Assistant => "MagicAppDev",
        }
    }
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = DateTime::from(time);
    local.format("%b %e, %H:%M").to_string()
}

pub fn message_line(message: &ChatMessage) -> String {
    match message.timestamp {
        Some(time) => format!(
            "{} [{}]: {}",
            message.role_label(),
            format_timestamp(time),
            message.content
        ),
        None => format!("{}: {}", message.role_label(), message.content),
    }
}

pub fn user_summary(user: &User) -> String {
    let mut line = format!("{} <{}>", user.display_name(), user.email);
    if user.is_admin() {
        line.push_str(" (admin)");
    }
    line
}

pub fn project_row(project: &Project) -> String {
    format!("{:<12} {:<9} {}", project.id, project.status.label(), project.name)
}

pub fn project_detail(project: &Project) -> Vec<String> {
    let mut lines = vec![
        format!("{} ({})", project.name, project.slug),
        format!("status:   {}", project.status),
    ];
    if let Some(description) = &project.description {
        lines.push(format!("about:    {description}"));
    }
    if let Some(url) = &project.github_url {
        lines.push(format!("github:   {url}"));
    }
    if let Some(url) = &project.deployment_url {
        lines.push(format!("deployed: {url}"));
    }
    lines.push(format!("created:  {}", project.created_at));
    lines
}

pub fn account_row(account: &LinkedAccount) -> String {
    format!("{:<8} {}", account.provider, account.provider_account_id)
}

pub fn theme_line(mode: ThemeMode) -> String {
    let label = match mode {
        ThemeMode::Light => "Light",
        ThemeMode::Dark => "Dark",
        ThemeMode::Automatic => "Automatic (follows system)",
    };
    format!("Theme: {label}")
}

/// Text for events worth showing; `None` for ones handled silently.
pub fn event_line(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::AuthFailed(message) => Some(format!("Authentication failed: {message}")),
        SessionEvent::Navigate(route) => Some(format!("-> {route}")),
        SessionEvent::CloseAuthBrowser => None,
    }
}
