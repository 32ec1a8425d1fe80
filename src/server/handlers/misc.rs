use crate::server::HandlerResult;

pub fn healthz() -> HandlerResult {
    Ok((
        200,
        serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    ))
}
