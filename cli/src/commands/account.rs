use anyhow::{Result, bail};
use serde::Serialize;

use crate::config::Config;
use crate::remote_http::HttpRemote;
use macrotrack_core::identity::Session;
use macrotrack_core::service::MacroService;

use super::sync::run_sync;

pub(crate) fn validate_principal(principal: &str) -> Result<&str> {
    let principal = principal.trim();
    if principal.is_empty() {
        bail!("Principal must not be empty");
    }
    if principal.contains('/') {
        bail!("Principal must not contain '/'");
    }
    Ok(principal)
}

/// Record `principal` as signed in, then pull everything it owns.
pub(crate) async fn cmd_signin(
    config: &mut Config,
    session: &Session,
    service: &MacroService,
    principal: &str,
    json: bool,
) -> Result<()> {
    let principal = validate_principal(principal)?;
    config.settings.principal = Some(principal.to_string());
    config.save()?;
    session.sign_in(principal);
    if !json {
        println!("Signed in as {principal}");
    }
    run_sync(service.full_sync(), json).await
}

pub(crate) fn cmd_signout(config: &mut Config) -> Result<()> {
    match config.settings.principal.take() {
        Some(principal) => {
            config.save()?;
            println!("Signed out {principal}");
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

#[derive(Serialize)]
struct Whoami<'a> {
    principal: Option<&'a str>,
    remote: Option<&'a str>,
}

pub(crate) fn cmd_whoami(config: &Config, remote_url: Option<&str>, json: bool) -> Result<()> {
    let principal = config.settings.principal.as_deref();
    if json {
        let out = Whoami {
            principal,
            remote: remote_url,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    match principal {
        Some(p) => println!("Signed in as {p}"),
        None => println!("Not signed in"),
    }
    match remote_url {
        Some(url) => println!("Remote: {url}"),
        None => println!("Remote: (none)"),
    }
    Ok(())
}

pub(crate) fn cmd_remote_set(config: &mut Config, url: &str, key: Option<String>) -> Result<()> {
    // Validates the URL shape before it is persisted.
    HttpRemote::new(url, key.clone())?;
    config.settings.remote_url = Some(url.trim_end_matches('/').to_string());
    if key.is_some() {
        config.settings.remote_api_key = key;
    }
    config.save()?;
    println!("Remote set to {url}");
    Ok(())
}

pub(crate) fn cmd_remote_clear(config: &mut Config) -> Result<()> {
    config.settings.remote_url = None;
    config.settings.remote_api_key = None;
    config.save()?;
    println!("Remote cleared; changes stay on this device");
    Ok(())
}
