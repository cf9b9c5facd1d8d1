//! Interactive login on the terminal, driving the integration's config flow

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context as _, Result};
use bold_integration::consts::{CONF_EMAIL, CONF_PASSWORD, DOMAIN};
use bold_integration::{ConfigFlowHandler, FormField};
use reqwest::Url;
use serde_json::{Map, Value};

/// Run the flow to completion and return the new entry id
pub async fn login(flows: &dyn ConfigFlowHandler, mut email: Option<String>) -> Result<String> {
    let mut result = flows.start_flow(DOMAIN, false).await?;

    loop {
        let input = match result.result_type.as_str() {
            "form" => {
                let fields = result.data_schema.clone();
                let errors = result.errors.clone().unwrap_or_default();
                let preset = email.take();
                tokio::task::spawn_blocking(move || read_form(&fields, &errors, preset))
                    .await
                    .context("reading login form")??
            }
            "external_step" => {
                let url = result
                    .url
                    .clone()
                    .ok_or_else(|| anyhow!("external step without a url"))?;
                tokio::task::spawn_blocking(move || read_callback(&url))
                    .await
                    .context("reading authorization callback")??
            }
            "create_entry" => {
                let entry_id = result
                    .entry_id()
                    .ok_or_else(|| anyhow!("flow finished without an entry"))?;
                println!("Added {}", result.title.as_deref().unwrap_or(entry_id));
                return Ok(entry_id.to_string());
            }
            "abort" => bail!(
                "login aborted: {}",
                result.reason.as_deref().unwrap_or("unknown")
            ),
            other => bail!("unexpected flow step {other}"),
        };

        let flow_id = result.flow_id.clone();
        result = flows.progress_flow(&flow_id, Some(input)).await?;
    }
}

fn read_form(
    fields: &[FormField],
    errors: &HashMap<String, String>,
    mut email: Option<String>,
) -> Result<Value> {
    for (field, error) in errors {
        eprintln!("{field}: {}", describe_error(error));
    }

    let mut input = Map::new();
    for field in fields {
        let value = match field.name.as_str() {
            CONF_EMAIL if email.is_some() && errors.is_empty() => email.take().unwrap_or_default(),
            CONF_PASSWORD => rpassword::prompt_password("Password: ")?,
            name => prompt(&format!("{}: ", label(name)))?,
        };
        input.insert(field.name.clone(), Value::String(value));
    }
    Ok(Value::Object(input))
}

fn read_callback(authorize_url: &str) -> Result<Value> {
    println!("Open this page, grant access, and paste the address you are sent back to:");
    println!("{authorize_url}");
    let pasted = prompt("Redirect URL: ")?;
    callback_input(authorize_url, &pasted)
}

/// `code` and `state` from the pasted redirect; a bare code takes the state
/// of the authorize URL
fn callback_input(authorize_url: &str, pasted: &str) -> Result<Value> {
    let query = |url: &Url, key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    let (code, state) = match Url::parse(pasted) {
        Ok(redirect) => (query(&redirect, "code"), query(&redirect, "state")),
        Err(_) => (Some(pasted.to_string()), None),
    };
    let code = code.ok_or_else(|| anyhow!("no code in the redirect URL"))?;
    let state = match state {
        Some(state) => state,
        None => {
            let authorize = Url::parse(authorize_url).context("parsing authorize URL")?;
            query(&authorize, "state").unwrap_or_default()
        }
    };

    Ok(serde_json::json!({ "code": code, "state": state }))
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn label(field: &str) -> String {
    let mut label = field.replace('_', " ");
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    label
}

fn describe_error(code: &str) -> &str {
    match code {
        "invalid_email" => "the email address was not accepted",
        "invalid_auth" => "wrong verification code or password",
        "cannot_connect" => "could not reach the Bold servers",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_from_redirect_url() {
        let input = callback_input(
            "https://auth.example.com/?state=s1",
            "http://localhost:8123/auth/external/callback?code=abc&state=s2",
        )
        .unwrap();
        assert_eq!(input["code"], "abc");
        assert_eq!(input["state"], "s2");
    }

    #[test]
    fn test_bare_code_uses_authorize_state() {
        let input = callback_input("https://auth.example.com/?client_id=x&state=s1", "abc").unwrap();
        assert_eq!(input["code"], "abc");
        assert_eq!(input["state"], "s1");
    }

    #[test]
    fn test_label() {
        assert_eq!(label("verification_code"), "Verification code");
    }
}
