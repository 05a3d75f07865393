use serde::Serialize;
use std::net::SocketAddr;
use utoipa::ToSchema;

/// Project URL + anon key of the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendCredentials {
    pub url: String,
    pub anon_key: String,
}

/// Access keys for the backend's S3-compatible storage endpoint.
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: Option<BackendCredentials>,
    /// Names of required variables that were absent at startup.
    pub missing: Vec<&'static str>,
    pub jwt_secret: Option<String>,
    pub s3: Option<S3Credentials>,
    pub frontend_url: String,
    pub bind_addr: String,
    pub enable_hsts: bool,
    pub metrics_addr: Option<SocketAddr>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

const URL_VARS: [&str; 2] = ["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
const KEY_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"];

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let first = |names: &[&str]| names.iter().find_map(|n| get(n));

        let url = first(&URL_VARS);
        let anon_key = first(&KEY_VARS);
        let mut missing = Vec::new();
        if url.is_none() {
            missing.push(URL_VARS[0]);
        }
        if anon_key.is_none() {
            missing.push(KEY_VARS[0]);
        }
        let backend = match (url, anon_key) {
            (Some(url), Some(anon_key)) => Some(BackendCredentials {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
            }),
            _ => None,
        };

        let s3 = match (get("SUPABASE_S3_ACCESS_KEY"), get("SUPABASE_S3_SECRET_KEY")) {
            (Some(access_key), Some(secret_key)) => Some(S3Credentials {
                access_key,
                secret_key,
                region: get("SUPABASE_S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            }),
            _ => None,
        };

        Self {
            backend,
            missing,
            jwt_secret: get("SUPABASE_JWT_SECRET"),
            s3,
            frontend_url: get("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            enable_hsts: get("ENABLE_HSTS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            metrics_addr: get("METRICS_ADDR").and_then(|v| v.parse().ok()),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".into()),
            ffprobe_path: get("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".into()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Scheme + host of the backend, used to whitelist storage media in the CSP.
    pub fn storage_origin(&self) -> Option<String> {
        let url = &self.backend.as_ref()?.url;
        let scheme_end = url.find("://")? + 3;
        let host_end = url[scheme_end..].find('/').map(|i| scheme_end + i).unwrap_or(url.len());
        Some(url[..host_end].to_string())
    }

    /// `Some` when the application must show setup instructions instead of content.
    pub fn setup_guide(&self) -> Option<SetupGuide> {
        if self.is_configured() {
            None
        } else {
            Some(SetupGuide::for_missing(&self.missing))
        }
    }
}

/// Instructions shown in place of every page while backend credentials are missing.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct SetupGuide {
    pub missing: Vec<String>,
    pub steps: Vec<String>,
    pub docs_url: String,
}

impl SetupGuide {
    pub fn for_missing(missing: &[&str]) -> Self {
        Self {
            missing: missing.iter().map(|s| s.to_string()).collect(),
            steps: vec![
                "Create a Supabase project".into(),
                "Copy the project URL and anon key from Settings > API".into(),
                format!("Set {} and {} in .env and restart the server", URL_VARS[0], KEY_VARS[0]),
            ],
            docs_url: "https://supabase.com/docs".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(vars: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|n| map.get(n).cloned())
    }

    #[test]
    fn missing_credentials_produce_setup_guide() {
        let c = cfg(&[("SUPABASE_URL", "https://x.supabase.co")]);
        assert!(!c.is_configured());
        let guide = c.setup_guide().unwrap();
        assert_eq!(guide.missing, vec!["SUPABASE_ANON_KEY".to_string()]);
    }

    #[test]
    fn public_prefixed_names_are_accepted() {
        let c = cfg(&[
            ("NEXT_PUBLIC_SUPABASE_URL", "https://x.supabase.co/"),
            ("NEXT_PUBLIC_SUPABASE_ANON_KEY", "anon"),
        ]);
        assert!(c.is_configured());
        assert_eq!(c.backend.unwrap().url, "https://x.supabase.co");
        assert!(c.missing.is_empty());
    }

    #[test]
    fn blank_values_count_as_missing() {
        let c = cfg(&[("SUPABASE_URL", "  "), ("SUPABASE_ANON_KEY", "k")]);
        assert!(c.setup_guide().is_some());
    }

    #[test]
    fn storage_origin_strips_path() {
        let c = cfg(&[("SUPABASE_URL", "https://abc.supabase.co/some/path"), ("SUPABASE_ANON_KEY", "k")]);
        assert_eq!(c.storage_origin().as_deref(), Some("https://abc.supabase.co"));
    }
}
