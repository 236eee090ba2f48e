//! Command handlers. Each one drives the session manager or API client and
//! prints the outcome.

use anyhow::Result;
use liftlog_core::models::{AvatarUpload, ProfileForm, SignUpForm, ValidationError};
use liftlog_core::{ApiError, Config, SessionError, SessionManager};
use tracing::warn;

use crate::prompt;
use crate::Command;

impl Command {
    /// Message shown when a failure carries nothing more specific
    pub fn fallback(&self) -> &'static str {
        match self {
            Command::Login { .. } => "Could not sign in. Please try again later.",
            Command::Signup => "Could not create the account. Please try again later.",
            Command::Logout => "Could not sign out cleanly.",
            Command::Whoami => "Could not read the current session.",
            Command::Groups => "Could not load muscle groups.",
            Command::Exercises { .. } => "Could not load exercises.",
            Command::Exercise { .. } => "Could not load exercise details.",
            Command::Done { .. } => "Could not register the exercise.",
            Command::History => "Could not load history.",
            Command::Profile { .. } | Command::Password => {
                "Could not update the profile. Please try again later."
            }
            Command::Avatar { .. } => "Could not update the profile picture.",
        }
    }
}

/// Render an error for the terminal: backend messages and validation
/// failures verbatim, everything else as `fallback` plus the cause.
pub fn describe_error(err: &anyhow::Error, fallback: &str) -> String {
    if let Some(e) = err.downcast_ref::<SessionError>() {
        return e.user_message(fallback);
    }
    if let Some(e) = err.downcast_ref::<ApiError>() {
        return e.user_message(fallback);
    }
    if let Some(e) = err.downcast_ref::<ValidationError>() {
        return e.to_string();
    }
    format!("{fallback} ({err:#})")
}

pub async fn run(command: &Command, session: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email } => login(session, config, email.as_deref()).await,
        Command::Signup => signup(session, config).await,
        Command::Logout => logout(session),
        Command::Whoami => whoami(session),
        Command::Groups => groups(session).await,
        Command::Exercises { group } => exercises(session, group).await,
        Command::Exercise { id } => exercise(session, id).await,
        Command::Done { id } => done(session, id).await,
        Command::History => history(session).await,
        Command::Profile { name } => profile(session, name).await,
        Command::Password => password(session).await,
        Command::Avatar { path } => avatar(session, path).await,
    }
}

fn require_session(session: &SessionManager) -> Result<(), SessionError> {
    if session.is_authenticated() {
        Ok(())
    } else {
        Err(SessionError::NotSignedIn)
    }
}

/// Remember the e-mail for the next login prompt
fn remember_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

// ============================================================================
// Account
// ============================================================================

async fn login(session: &SessionManager, config: &mut Config, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(email) => email.trim().to_string(),
        None => prompt::line_or("E-mail", config.last_email.as_deref())?,
    };
    if email.is_empty() {
        return Err(ValidationError::EmailRequired.into());
    }
    let password = prompt::password("Password")?;
    if password.is_empty() {
        return Err(ValidationError::PasswordRequired.into());
    }

    let user = session.sign_in(&email, &password).await?;
    remember_email(config, &email);

    println!("Signed in as {}", user.display_name());
    Ok(())
}

async fn signup(session: &SessionManager, config: &mut Config) -> Result<()> {
    let form = SignUpForm {
        name: prompt::line("Name")?,
        email: prompt::line("E-mail")?,
        password: prompt::password("Password")?,
        confirm_password: prompt::password("Confirm password")?,
    };

    let user = session.sign_up(&form).await?;
    remember_email(config, &user.email);

    println!("Welcome, {}! Your account is ready.", user.display_name());
    Ok(())
}

fn logout(session: &SessionManager) -> Result<()> {
    let was_signed_in = session.is_authenticated();
    session.sign_out()?;
    if was_signed_in {
        println!("Signed out");
    } else {
        println!("Not signed in");
    }
    Ok(())
}

fn whoami(session: &SessionManager) -> Result<()> {
    let Some(user) = session.user().filter(|u| u.is_authenticated()) else {
        println!("Not signed in");
        return Ok(());
    };

    println!("{}", user.display_name());
    println!("  e-mail: {}", user.email);
    if let Some(avatar) = user.avatar.as_deref().filter(|a| !a.is_empty()) {
        println!("  avatar: {}", session.api().avatar_url(avatar));
    }
    Ok(())
}

// ============================================================================
// Exercises and history
// ============================================================================

async fn groups(session: &SessionManager) -> Result<()> {
    require_session(session)?;
    let groups = session.api().fetch_groups().await?;
    if groups.is_empty() {
        println!("No muscle groups");
    }
    for group in groups {
        println!("{group}");
    }
    Ok(())
}

async fn exercises(session: &SessionManager, group: &str) -> Result<()> {
    require_session(session)?;
    let exercises = session.api().fetch_exercises_by_group(group).await?;
    if exercises.is_empty() {
        println!("No exercises for {group}");
        return Ok(());
    }

    println!("{} exercises", exercises.len());
    for exercise in exercises {
        println!("{:>6}  {}  ({})", exercise.id, exercise.name, exercise.summary());
    }
    Ok(())
}

async fn exercise(session: &SessionManager, id: &str) -> Result<()> {
    require_session(session)?;
    let api = session.api();
    let exercise = api.fetch_exercise(id).await?;

    println!("{}", exercise.name);
    println!("  group: {}", exercise.group);
    println!("  {}", exercise.summary());
    println!("  demo:  {}", api.exercise_demo_url(&exercise));
    println!("  thumb: {}", api.exercise_thumb_url(&exercise));
    Ok(())
}

async fn done(session: &SessionManager, id: &str) -> Result<()> {
    require_session(session)?;
    session.api().register_history(id).await?;
    println!("Congratulations! Exercise registered in your history.");
    Ok(())
}

async fn history(session: &SessionManager) -> Result<()> {
    require_session(session)?;
    let days = session.api().fetch_history().await?;
    if days.is_empty() {
        println!("No exercises registered yet");
        return Ok(());
    }

    for day in days {
        println!("{}", day.title);
        for entry in day.data {
            println!("  {:<5}  {} ({})", entry.hour, entry.name, entry.group);
        }
    }
    Ok(())
}

// ============================================================================
// Profile
// ============================================================================

async fn profile(session: &SessionManager, name: &str) -> Result<()> {
    require_session(session)?;
    let form = ProfileForm {
        name: name.to_string(),
        ..Default::default()
    };

    let user = session.update_profile_remote(&form).await?;
    println!("Profile updated: {}", user.display_name());
    Ok(())
}

async fn password(session: &SessionManager) -> Result<()> {
    require_session(session)?;
    let user = session.user().ok_or(SessionError::NotSignedIn)?;

    let form = ProfileForm {
        name: user.name,
        old_password: prompt::password("Current password")?,
        password: prompt::password("New password")?,
        confirm_password: prompt::password("Confirm new password")?,
    };
    if !form.changes_password() {
        return Err(ValidationError::PasswordRequired.into());
    }

    session.update_profile_remote(&form).await?;
    println!("Password changed");
    Ok(())
}

async fn avatar(session: &SessionManager, path: &std::path::Path) -> Result<()> {
    require_session(session)?;
    let user = session.user().ok_or(SessionError::NotSignedIn)?;

    let upload = AvatarUpload::from_path(&user.name, path)?;
    let user = session.update_avatar(&upload).await?;

    match user.avatar.as_deref() {
        Some(avatar) => println!("Profile picture updated: {}", session.api().avatar_url(avatar)),
        None => println!("Profile picture updated"),
    }
    Ok(())
}
