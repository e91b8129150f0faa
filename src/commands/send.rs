use super::{print_outcome, resolve_session};
use crate::chat::ChatService;
use crate::error::Result;

/// Handle `parley send <prompt>`
///
/// Backend failures are printed and attached to the session; they do not
/// make the command fail. Validation and lookup errors do.
pub async fn run_send(
    service: &ChatService,
    prompt: &str,
    session: Option<&str>,
    use_streaming: bool,
    json: bool,
) -> Result<()> {
    let session = resolve_session(service, session).await?;
    tracing::debug!(session_id = %session.id, use_streaming, "One-shot send");

    let outcome = service.send(&session.id, prompt, use_streaming).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.session)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}
