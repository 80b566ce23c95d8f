use crate::ui::{self, RoleLabel};
use anyhow::{anyhow, bail, Context, Result};
use magicapp_core::api::{ApiClient, ClientContext};
use magicapp_core::chat::{ChatSession, GREETING};
use magicapp_core::config::ClientSettings;
use magicapp_core::models::Registration;
use magicapp_core::oauth::{authorize_url, OAuthProvider};
use magicapp_core::preferences::ThemeMode;
use magicapp_core::project::{NewProject, ProjectList};
use magicapp_core::routes::{guard, Route, RouteDecision};
use magicapp_core::session::{Session, SessionEvent, SessionManager};
use magicapp_core::storage::KeyValueStore;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

const EXIT_COMMANDS: [&str; 2] = ["/exit", "/quit"];
const DELETE_ACCOUNT_WARNING: &str =
    "This action is permanent and cannot be undone. All your projects and data will be lost.";

/// Wires storage, the API client and the session manager for one invocation.
pub struct MagicApp {
    settings: ClientSettings,
    api: ApiClient,
    session: SessionManager,
    events: UnboundedReceiver<SessionEvent>,
    store: Arc<dyn KeyValueStore>,
}

impl MagicApp {
    pub fn new(settings: ClientSettings, store: Arc<dyn KeyValueStore>) -> Self {
        let context = ClientContext::new();
        let api = ApiClient::from_settings(&settings, context.clone());
        let (session, events) =
            SessionManager::new(Arc::new(api.clone()), store.clone(), context, &settings);
        Self {
            settings,
            api,
            session,
            events,
            store,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn start(&self, launch_url: Option<&str>) -> Session {
        self.session.bootstrap(launch_url).await
    }

    /// Refuse to continue unless `route` would render for the current session.
    pub fn require(&self, route: &Route) -> Result<()> {
        match guard(&route.path(), self.session.status()) {
            RouteDecision::Render(_) => Ok(()),
            RouteDecision::Loading => bail!("Still restoring your session, try again"),
            RouteDecision::Redirect(Route::Login) => {
                bail!("You are not signed in. Run `magicapp login` first.")
            }
            RouteDecision::Redirect(_) => {
                let who = self
                    .session
                    .current()
                    .user()
                    .map(ui::user_summary)
                    .unwrap_or_default();
                bail!("Already signed in as {who}. Run `magicapp logout` first.")
            }
        }
    }

    /// Print pending session events.
    pub fn flush_events<W: Write>(&mut self, out: &mut W) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            match ui::event_line(&event) {
                Some(line) => writeln!(out, "{line}")?,
                None => debug!(?event, "session event"),
            }
        }
        Ok(())
    }

    pub async fn login<W: Write>(&self, email: &str, password: &str, out: &mut W) -> Result<()> {
        self.require(&Route::Login)?;
        let user = self.session.login(email, password).await?;
        writeln!(out, "Signed in as {}", ui::user_summary(&user))?;
        Ok(())
    }

    pub async fn register<W: Write>(&self, registration: &Registration, out: &mut W) -> Result<()> {
        self.require(&Route::Register)?;
        let user = self.session.register(registration).await?;
        writeln!(out, "Welcome, {}", user.display_name())?;
        Ok(())
    }

    /// Print the provider sign-in URL and complete sign-in from the pasted redirect.
    pub async fn oauth<R, W>(&self, provider: OAuthProvider, input: &mut R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        self.require(&Route::Login)?;
        let url = authorize_url(&self.settings.api_url, provider, self.settings.platform)?;
        writeln!(out, "Open this URL to sign in with {}:", provider.slug())?;
        writeln!(out, "{url}")?;
        writeln!(out, "Then paste the URL you were redirected to:")?;
        out.flush()?;

        let mut redirect = String::new();
        input
            .read_line(&mut redirect)
            .await
            .context("failed to read redirect url")?;
        match self.session.handle_redirect(redirect.trim()).await? {
            Some(user) => writeln!(out, "Signed in as {}", ui::user_summary(&user))?,
            None => bail!("That URL did not contain sign-in tokens"),
        }
        Ok(())
    }

    /// Report the outcome of a callback URL passed to [`MagicApp::start`].
    pub fn callback_result<W: Write>(&self, out: &mut W) -> Result<()> {
        match self.session.current().user() {
            Some(user) => writeln!(out, "Signed in as {}", ui::user_summary(user))?,
            None => bail!("Sign-in did not complete"),
        }
        Ok(())
    }

    pub async fn logout<W: Write>(&self, out: &mut W) -> Result<()> {
        self.session.logout().await;
        writeln!(out, "Signed out")?;
        Ok(())
    }

    pub fn whoami<W: Write>(&self, out: &mut W) -> Result<()> {
        self.require(&Route::Home)?;
        let session = self.session.current();
        let user = session
            .user()
            .ok_or_else(|| anyhow!("no signed-in user"))?;
        writeln!(out, "{}", ui::user_summary(user))?;
        Ok(())
    }

    /// Line-oriented chat. Blank lines are ignored and `/exit` ends the loop.
    pub async fn chat<R, W>(&self, once: bool, input: &mut R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write + Send,
    {
        self.require(&Route::Chat)?;
        let chat = ChatSession::new(Arc::new(self.api.clone()));
        writeln!(out, "MagicAppDev: {GREETING}")?;

        let mut lines = input.lines();
        loop {
            write!(out, "> ")?;
            out.flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if EXIT_COMMANDS.contains(&line) {
                break;
            }

            if once {
                if let Some(reply) = chat.send_once(line).await {
                    writeln!(out, "{}", ui::message_line(&reply))?;
                }
                continue;
            }

            let mut streamed = String::new();
            let mut started = false;
            let mut write_error: Option<std::io::Error> = None;
            let reply = chat
                .send(line, |partial| {
                    if write_error.is_some() {
                        return;
                    }
                    let written = write_delta(out, &mut started, &partial[streamed.len()..]);
                    streamed.clear();
                    streamed.push_str(partial);
                    write_error = written.err();
                })
                .await;
            if let Some(err) = write_error {
                return Err(err.into());
            }
            let Some(reply) = reply else {
                continue;
            };
            if started {
                writeln!(out)?;
            }
            if reply.content != streamed {
                writeln!(out, "{}: {}", reply.role_label(), reply.content)?;
            }
        }
        Ok(())
    }

    pub async fn list_projects<W: Write>(&self, out: &mut W) -> Result<()> {
        self.require(&Route::Projects)?;
        let mut projects = ProjectList::new();
        let listed = projects.refresh(&self.api).await?;
        if listed.is_empty() {
            writeln!(out, "No projects yet. Create one with `magicapp projects create`.")?;
        }
        for project in listed {
            writeln!(out, "{}", ui::project_row(project))?;
        }
        Ok(())
    }

    pub async fn show_project<W: Write>(&self, id: &str, out: &mut W) -> Result<()> {
        self.require(&Route::ProjectDetail(id.to_string()))?;
        let project = self.api.project(id).await?;
        for line in ui::project_detail(&project) {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    pub async fn create_project<W: Write>(
        &self,
        name: &str,
        description: Option<&str>,
        out: &mut W,
    ) -> Result<()> {
        self.require(&Route::NewProject)?;
        let request = NewProject::new(name, description)?;
        let mut projects = ProjectList::new();
        let created = projects.create(&self.api, &request).await?;
        writeln!(out, "Created {}", ui::project_row(created))?;
        Ok(())
    }

    pub async fn delete_project<W: Write>(&self, id: &str, out: &mut W) -> Result<()> {
        self.require(&Route::ProjectDetail(id.to_string()))?;
        let mut projects = ProjectList::new();
        projects.delete(&self.api, id).await?;
        writeln!(out, "Deleted project {id}")?;
        Ok(())
    }

    /// Show the theme, or change it to a mode name or `toggle`.
    pub async fn theme<W: Write>(&self, change: Option<&str>, out: &mut W) -> Result<()> {
        let current = ThemeMode::load(self.store.as_ref()).await;
        let next = match change.map(str::trim) {
            None => current,
            Some("toggle") => current.toggled(),
            Some(name) => name.parse::<ThemeMode>().map_err(|err| anyhow!(err))?,
        };
        if next != current {
            next.save(self.store.as_ref()).await?;
        }
        writeln!(out, "{}", ui::theme_line(next))?;
        Ok(())
    }

    pub async fn accounts<W: Write>(&self, out: &mut W) -> Result<()> {
        self.require(&Route::Settings)?;
        let accounts = self.api.linked_accounts().await?;
        if accounts.is_empty() {
            writeln!(out, "No linked accounts")?;
        }
        for account in &accounts {
            writeln!(out, "{}", ui::account_row(account))?;
        }
        for provider in [OAuthProvider::GitHub, OAuthProvider::Discord] {
            writeln!(
                out,
                "Link {}: {}",
                provider.slug(),
                self.api.link_account_url(provider)?
            )?;
        }
        Ok(())
    }

    pub async fn change_password<W: Write>(
        &self,
        current: &str,
        new: &str,
        out: &mut W,
    ) -> Result<()> {
        self.require(&Route::Settings)?;
        if current.is_empty() || new.is_empty() {
            bail!("Current and new password are required");
        }
        self.api.change_password(current, new).await?;
        writeln!(out, "Password changed")?;
        Ok(())
    }

    /// Permanently delete the signed-in account, then sign out.
    pub async fn delete_account<W: Write>(&self, confirmed: bool, out: &mut W) -> Result<()> {
        self.require(&Route::Settings)?;
        if !confirmed {
            bail!("{DELETE_ACCOUNT_WARNING} Pass --yes to delete your account.");
        }
        self.api
            .delete_account()
            .await
            .context("Failed to delete account. Please try again.")?;
        self.session.logout().await;
        writeln!(out, "Account deleted")?;
        Ok(())
    }
}

fn write_delta<W: Write>(out: &mut W, started: &mut bool, delta: &str) -> std::io::Result<()> {
    if !*started {
        write!(out, "MagicAppDev: ")?;
        *started = true;
    }
    write!(out, "{delta}")?;
    out.flush()
}
