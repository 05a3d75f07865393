use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{http::header, Error};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::config::AppConfig;

/// Baseline response headers. The CSP admits images and media from the storage origin.
#[derive(Clone, Default)]
pub struct SecurityHeaders {
    pub enable_hsts: bool,
    pub media_origin: Option<String>,
}

impl SecurityHeaders {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { enable_hsts: config.enable_hsts, media_origin: config.storage_origin() }
    }

    pub fn with_hsts(mut self, enable: bool) -> Self {
        self.enable_hsts = enable;
        self
    }

    pub fn content_security_policy(&self) -> String {
        let extra = self.media_origin.as_deref().map(|o| format!(" {o}")).unwrap_or_default();
        format!(
            "default-src 'self'; img-src 'self' data: blob:{extra}; media-src 'self' blob:{extra}; \
             connect-src 'self'{extra}; object-src 'none'; base-uri 'none'; frame-ancestors 'none'; form-action 'self'"
        )
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecurityHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        let csp = header::HeaderValue::from_str(&self.content_security_policy())
            .unwrap_or_else(|_| header::HeaderValue::from_static("default-src 'self'"));
        ready(Ok(SecurityHeadersMiddleware { service: Rc::new(service), csp, enable_hsts: self.enable_hsts }))
    }
}

pub struct SecurityHeadersMiddleware<S> {
    service: Rc<S>,
    csp: header::HeaderValue,
    enable_hsts: bool,
}

impl<S, B> Service<ServiceRequest> for SecurityHeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let csp = self.csp.clone();
        let enable_hsts = self.enable_hsts;
        Box::pin(async move {
            let mut res = svc.call(req).await?;
            let headers = res.response_mut().headers_mut();
            let defaults = [
                (header::CONTENT_SECURITY_POLICY, csp),
                (header::REFERRER_POLICY, header::HeaderValue::from_static("strict-origin-when-cross-origin")),
                (header::X_CONTENT_TYPE_OPTIONS, header::HeaderValue::from_static("nosniff")),
                (header::X_FRAME_OPTIONS, header::HeaderValue::from_static("DENY")),
            ];
            for (name, value) in defaults {
                if !headers.contains_key(&name) {
                    headers.insert(name, value);
                }
            }
            if enable_hsts && !headers.contains_key(header::STRICT_TRANSPORT_SECURITY) {
                headers.insert(
                    header::STRICT_TRANSPORT_SECURITY,
                    header::HeaderValue::from_static("max-age=63072000; includeSubDomains"),
                );
            }
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csp_lists_storage_origin() {
        let s = SecurityHeaders { enable_hsts: false, media_origin: Some("https://abc.supabase.co".into()) };
        let csp = s.content_security_policy();
        assert!(csp.contains("img-src 'self' data: blob: https://abc.supabase.co;"));
        assert!(csp.contains("media-src 'self' blob: https://abc.supabase.co;"));
    }

    #[test]
    fn csp_without_backend_is_self_only() {
        let csp = SecurityHeaders::default().content_security_policy();
        assert!(csp.contains("media-src 'self' blob:;"));
    }
}
