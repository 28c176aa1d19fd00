//! Single-shot web executor.
//!
//! Drives a headless browser through one `navigate`/`click`/`type`/
//! `screenshot`/`extract` action, enforcing the HTTPS + domain-allowlist
//! policy both before issuing the action and on every request the page
//! itself makes. The interception step is defense-in-depth on top of the
//! container's own egress filter, installed by the container entrypoint
//! before this binary ever runs.

use std::time::Duration;

use chromiumoxide::Browser;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams, ErrorReason,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use secureclaw_core::dispatcher::ExecutorResult;
use secureclaw_core::executor::{bootstrap, emit_and_exit};
use secureclaw_core::security::capabilities::{ExecutorKind, NetworkPolicy, host_allowed};
use secureclaw_core::security::sandbox;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct WebTask {
    action: String,
    #[serde(default)]
    params: WebParams,
}

#[derive(Debug, Default, Deserialize)]
struct WebParams {
    url: Option<String>,
    selector: Option<String>,
    label: Option<String>,
    text: Option<String>,
    #[serde(default)]
    screenshot: bool,
}

const MAX_TREE_DEPTH: usize = 20;
const MAX_TREE_NODES: usize = 800;

#[tokio::main]
async fn main() {
    let (boot, task): (_, WebTask) = match bootstrap(ExecutorKind::Web) {
        Ok(v) => v,
        Err(envelope) => emit_and_exit(envelope),
    };
    let capability = boot.capability;

    // No `sandbox::apply_landlock` here: this binary runs as root to install
    // the container's egress filter and needs unrestricted access to the
    // chromium binary and its profile/cache directories that a single
    // mount-rooted ruleset would block.
    sandbox::apply_resource_limits(&sandbox::ResourceLimits::default());

    let allowed_domains = match &capability.network {
        NetworkPolicy::Allow { allowed_domains } if !allowed_domains.is_empty() => allowed_domains.clone(),
        _ => {
            emit_and_exit(error_result("PROTOCOL_BLOCKED: capability grants no network allowlist"));
        }
    };

    if let Some(url) = &task.params.url {
        if let Err(e) = check_url(url, &allowed_domains) {
            emit_and_exit(error_result(&e));
        }
    }

    let result = run(&task, &allowed_domains, capability.max_output_bytes, capability.timeout_seconds).await;
    emit_and_exit(result);
}

fn error_result(message: &str) -> ExecutorResult {
    ExecutorResult {
        success: false,
        exit_code: Some(1),
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: 0,
        error: Some(message.to_string()),
    }
}

/// Require `https:` scheme and an allowlisted host.
fn check_url(url: &str, allowed_domains: &[String]) -> Result<(), String> {
    if !url.starts_with("https://") {
        return Err(format!("PROTOCOL_BLOCKED: '{url}' is not https"));
    }
    let host = url
        .trim_start_matches("https://")
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .rsplit_once('@')
        .map(|(_, h)| h)
        .unwrap_or_else(|| url.trim_start_matches("https://").split(['/', '?', '#']).next().unwrap_or(""))
        .rsplit_once(':')
        .map(|(h, _)| h)
        .unwrap_or(url.trim_start_matches("https://").split(['/', '?', '#']).next().unwrap_or(""))
        .to_lowercase();

    if !host_allowed(allowed_domains, &host) {
        return Err(format!("DNS_BLOCKED: host '{host}' is not in the capability's allowed domains"));
    }
    Ok(())
}

async fn run(task: &WebTask, allowed_domains: &[String], max_output_bytes: usize, timeout_secs: u64) -> ExecutorResult {
    let start = std::time::Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), drive(task, allowed_domains)).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Err(_) => ExecutorResult {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            error: Some("timeout".to_string()),
        },
        Ok(Err(message)) => ExecutorResult {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            error: Some(message),
        },
        Ok(Ok(mut stdout)) => {
            if stdout.len() > max_output_bytes {
                stdout.truncate(max_output_bytes);
                stdout.push_str("\n... [output truncated]");
            }
            ExecutorResult {
                success: true,
                exit_code: Some(0),
                stdout,
                stderr: String::new(),
                duration_ms,
                error: None,
            }
        }
    }
}

async fn drive(task: &WebTask, allowed_domains: &[String]) -> Result<String, String> {
    let config = BrowserConfig::builder()
        .no_sandbox()
        .build()
        .map_err(|e| format!("browser config: {e}"))?;
    let (mut browser, mut handler) = Browser::launch(config).await.map_err(|e| format!("browser launch: {e}"))?;
    let handler_task = tokio::spawn(async move {
        while handler.next().await.is_some() {}
    });

    let page = browser.new_page("about:blank").await.map_err(|e| format!("new page: {e}"))?;
    install_request_filter(&page, allowed_domains).await?;

    let result = execute_action(&page, task).await;

    let _ = browser.close().await;
    handler_task.abort();
    result
}

/// Re-check every outgoing request against the allowlist: only
/// `data:`/`blob:` URLs and HTTPS requests to an allowed host may
/// proceed; everything else is aborted at the page level, on top of the
/// container's own egress filter.
async fn install_request_filter(page: &chromiumoxide::Page, allowed_domains: &[String]) -> Result<(), String> {
    page.execute(FetchEnableParams::default())
        .await
        .map_err(|e| format!("fetch enable: {e}"))?;

    let mut events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| format!("fetch listener: {e}"))?;
    let allowed = allowed_domains.to_vec();
    let page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let url = &event.request.url;
            let permitted = url.starts_with("data:")
                || url.starts_with("blob:")
                || (url.starts_with("https://") && url_host(url).map(|h| host_allowed(&allowed, &h)).unwrap_or(false));

            let outcome = if permitted {
                let params = ContinueRequestParams::builder().request_id(event.request_id.clone()).build().expect("request_id set");
                page.execute(params).await.map(|_| ())
            } else {
                let params = FailRequestParams::builder()
                    .request_id(event.request_id.clone())
                    .error_reason(ErrorReason::BlockedByClient)
                    .build()
                    .expect("request_id and error_reason set");
                page.execute(params).await.map(|_| ())
            };
            if let Err(e) = outcome {
                eprintln!("[exec-web] fetch continuation failed: {e}");
            }
        }
    });
    Ok(())
}

fn url_host(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    Some(host.to_lowercase())
}

async fn execute_action(page: &chromiumoxide::Page, task: &WebTask) -> Result<String, String> {
    match task.action.as_str() {
        "navigate" => {
            let url = task.params.url.as_deref().ok_or("navigate requires 'url'")?;
            page.goto(url).await.map_err(|e| format!("navigate failed: {e}"))?;
            page.wait_for_navigation().await.map_err(|e| format!("navigation wait failed: {e}"))?;
            finish(page, task.params.screenshot).await
        }
        "click" => {
            let element = find_target(page, task).await?;
            element.click().await.map_err(|e| format!("click failed: {e}"))?;
            finish(page, task.params.screenshot).await
        }
        "type" => {
            let text = task.params.text.as_deref().ok_or("type requires 'text'")?;
            let element = find_target(page, task).await?;
            element.click().await.map_err(|e| format!("focus failed: {e}"))?;
            element.type_str(text).await.map_err(|e| format!("type failed: {e}"))?;
            finish(page, task.params.screenshot).await
        }
        "screenshot" => finish(page, true).await,
        "extract" => finish(page, false).await,
        other => Err(format!("unknown action '{other}'")),
    }
}

/// Resolve the action's target element: accessible role/label first, since
/// that's what the model actually sees in the accessibility-tree snapshot
/// it's working from, falling back to a raw CSS `selector` when no label
/// match is given.
async fn find_target<'p>(page: &'p chromiumoxide::Page, task: &WebTask) -> Result<chromiumoxide::element::Element<'p>, String> {
    if let Some(label) = &task.params.label {
        let escaped = label.replace('\'', "\\'");
        let selector = format!(
            "[aria-label='{escaped}'], [role][aria-label='{escaped}'], button:has-text('{escaped}')"
        );
        return page.find_element(selector.as_str()).await.map_err(|e| format!("label '{label}' not found: {e}"));
    }
    if let Some(selector) = &task.params.selector {
        return page.find_element(selector.as_str()).await.map_err(|e| format!("selector '{selector}' not found: {e}"));
    }
    Err("click/type requires 'selector' or 'label'".to_string())
}

/// Build the combined result: an accessibility-tree snapshot, plus a
/// base64 screenshot when requested.
async fn finish(page: &chromiumoxide::Page, want_screenshot: bool) -> Result<String, String> {
    let snapshot = accessibility_snapshot(page).await?;
    if !want_screenshot {
        return Ok(snapshot);
    }
    let params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Jpeg).build();
    let bytes = page.screenshot(params).await.map_err(|e| format!("screenshot failed: {e}"))?;
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);
    Ok(format!("{snapshot}\n\n[screenshot:base64]\n{encoded}"))
}

/// Compact indented text of the visible semantic tree, built by walking
/// the DOM in-page and collapsing unlabeled generic wrappers. Depth and
/// node count are capped to keep the snapshot boundable; a JS walk is
/// used rather than the CDP Accessibility domain because it can apply the
/// "collapse generic wrappers" rule directly against computed ARIA roles.
async fn accessibility_snapshot(page: &chromiumoxide::Page) -> Result<String, String> {
    let script = format!(
        r#"(function() {{
            const maxDepth = {MAX_TREE_DEPTH};
            const maxNodes = {MAX_TREE_NODES};
            let count = 0;
            const lines = [];
            function role(el) {{
                return el.getAttribute('role') || el.tagName.toLowerCase();
            }}
            function name(el) {{
                return el.getAttribute('aria-label') || el.innerText?.trim().slice(0, 80) || '';
            }}
            function isGeneric(el) {{
                return ['div', 'span'].includes(el.tagName.toLowerCase()) && !el.getAttribute('role') && !el.getAttribute('aria-label');
            }}
            function visible(el) {{
                const style = window.getComputedStyle(el);
                return style.display !== 'none' && style.visibility !== 'hidden';
            }}
            function walk(el, depth) {{
                if (count >= maxNodes || depth > maxDepth || !el || !visible(el)) return;
                if (!isGeneric(el)) {{
                    lines.push('  '.repeat(depth) + '[' + role(el) + '] "' + name(el) + '"');
                    count++;
                }}
                for (const child of el.children) {{
                    walk(child, isGeneric(el) ? depth : depth + 1);
                }}
            }}
            walk(document.body, 0);
            return lines.join('\n');
        }})()"#
    );
    let value: Value = page.evaluate(script).await.map_err(|e| format!("snapshot eval failed: {e}"))?.into_value().map_err(|e| format!("snapshot decode failed: {e}"))?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_https_url() {
        let err = check_url("http://example.com", &["example.com".to_string()]).unwrap_err();
        assert!(err.starts_with("PROTOCOL_BLOCKED"));
    }

    #[test]
    fn rejects_host_outside_allowlist() {
        let err = check_url("https://evil.com/", &["example.com".to_string()]).unwrap_err();
        assert!(err.starts_with("DNS_BLOCKED"));
    }

    #[test]
    fn allows_subdomain_of_allowed_domain() {
        assert!(check_url("https://api.example.com/", &["example.com".to_string()]).is_ok());
    }

    #[test]
    fn url_host_strips_scheme_port_and_path() {
        assert_eq!(url_host("https://Example.com:443/a/b"), Some("example.com".to_string()));
        assert_eq!(url_host("data:text/plain,hi"), None);
    }
}
