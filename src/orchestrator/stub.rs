//! Installs `llm_query(prompt)` into a kernel.
//!
//! The kernel knows nothing about the bridge; this generated function is
//! the only link, built on the kernel's generic `http_post` builtin.

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use super::client::KernelClient;

/// Name the stub is bound to in the kernel namespace.
pub const STUB_NAME: &str = "llm_query";

const INSTALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Kernel source for `llm_query`, posting to `callback_url`.
///
/// A reply without `result` comes back as a plain `llm_query error: ...`
/// string; transport failures surface as kernel faults.
pub fn stub_source(callback_url: &str) -> Result<String> {
    let url = serde_json::to_string(callback_url)?;
    Ok(format!(
        r#"def {STUB_NAME}(prompt) {{
    reply = http_post({url}, {{"prompt": prompt}})
    if type(reply) == "dict" and "result" in reply {{
        return reply["result"]
    }}
    if type(reply) == "dict" and "error" in reply {{
        return "{STUB_NAME} error: " + str(reply["error"])
    }}
    return "{STUB_NAME} error: " + str(reply)
}}
"#
    ))
}

/// Defines the stub in the kernel and checks it landed.
pub async fn inject(kernel: &KernelClient, callback_url: &str) -> Result<()> {
    let result = kernel
        .exec(&stub_source(callback_url)?, INSTALL_TIMEOUT)
        .await?;
    if !result.output.is_empty() {
        anyhow::bail!("installing {STUB_NAME} failed: {}", result.output.trim_end());
    }
    if !result.vars.iter().any(|name| name == STUB_NAME) {
        anyhow::bail!("{STUB_NAME} missing from kernel namespace after install");
    }
    info!("Installed {STUB_NAME} -> {callback_url}");
    Ok(())
}
