use magicapp_core::config::ClientSettings;
use serde_json::{json, Value};
use wiremock::{MockServer, ResponseTemplate};

mod chat_tests;
mod session_tests;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn settings_for(server: &MockServer) -> ClientSettings {
    ClientSettings {
        api_url: server.uri(),
        chat_url: server.uri(),
        trusted_origins: vec![server.uri()],
        ..ClientSettings::default()
    }
}

fn ok(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn user_body(id: &str, name: &str) -> Value {
    json!({
        "success": true,
        "data": {"id": id, "email": format!("{id}@example.com"), "name": name}
    })
}
