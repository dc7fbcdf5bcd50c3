//! Deployment descriptor rendering
//!
//! Rendering is a pure function: identical parameters always produce the
//! identical document, byte for byte. The side-effecting half
//! (writing the document to the remote host and applying it) lives in
//! [`crate::deploy::remote`].

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to render deployment descriptor: {0}")]
pub struct RenderError(#[from] serde_yaml::Error);

/// Inputs to descriptor rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorParams {
    /// Compose service name
    pub service: String,

    /// Full image reference, `repository:tag`
    pub image: String,

    pub host_port: u16,
    pub container_port: u16,

    /// Service environment; a BTreeMap so key order (and therefore the
    /// rendered bytes) is stable
    pub env: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ComposeFile<'a> {
    services: BTreeMap<&'a str, ComposeService<'a>>,
}

#[derive(Serialize)]
struct ComposeService<'a> {
    image: &'a str,
    container_name: &'a str,
    restart: &'static str,
    ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: &'a BTreeMap<String, String>,
}

/// Render the compose document for one service.
///
/// Desired-state semantics: the caller overwrites whatever is on the
/// remote host with this document on every run; nothing is diffed.
pub fn render(params: &DescriptorParams) -> Result<String, RenderError> {
    let service = ComposeService {
        image: &params.image,
        container_name: &params.service,
        restart: "always",
        ports: vec![format!("{}:{}", params.host_port, params.container_port)],
        environment: &params.env,
    };

    let mut services = BTreeMap::new();
    services.insert(params.service.as_str(), service);

    Ok(serde_yaml::to_string(&ComposeFile { services })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DescriptorParams {
        let mut env = BTreeMap::new();
        env.insert("FLASK_ENV".to_string(), "production".to_string());
        env.insert("APP_PORT".to_string(), "8000".to_string());

        DescriptorParams {
            service: "webapp".to_string(),
            image: "registry.example.com/webapp:v42".to_string(),
            host_port: 80,
            container_port: 8000,
            env,
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render(&params()).unwrap();
        let b = render(&params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_contents() {
        let text = render(&params()).unwrap();

        assert!(text.contains("webapp:"));
        assert!(text.contains("image: registry.example.com/webapp:v42"));
        assert!(text.contains("restart: always"));
        assert!(text.contains("80:8000"));
        assert!(text.contains("FLASK_ENV: production"));
    }

    #[test]
    fn test_render_omits_empty_environment() {
        let mut p = params();
        p.env.clear();
        let text = render(&p).unwrap();
        assert!(!text.contains("environment"));
    }

    #[test]
    fn test_different_tag_changes_output() {
        let a = render(&params()).unwrap();
        let mut p = params();
        p.image = "registry.example.com/webapp:v43".to_string();
        let b = render(&p).unwrap();
        assert_ne!(a, b);
    }
}
