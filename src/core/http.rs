//! Per-`Handle` HTTP client construction (spec §3 "TLS/auth/proxy material",
//! §6.1). The original global client singleton is replaced: a `Handle` owns
//! its own TLS/proxy/auth material, so the client has to be built from a
//! `HandleConfig` rather than shared process-wide.

use reqwest::{Client, Proxy};

use crate::config::{HandleConfig, IpResolve};
use crate::core::error::{Error, Result};

/// Build a `reqwest::Client` reflecting a `HandleConfig`'s TLS, proxy,
/// header, timeout and redirect options.
pub fn build_client(config: &HandleConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.connect_timeout)
        .pool_max_idle_per_host(config.max_parallel_downloads.max(1))
        .tcp_nodelay(true)
        .danger_accept_invalid_certs(!config.tls.ssl_verify_peer)
        .danger_accept_invalid_hostnames(!config.tls.ssl_verify_host);

    builder = if config.follow_location {
        builder.redirect(reqwest::redirect::Policy::limited(10))
    } else {
        builder.redirect(reqwest::redirect::Policy::none())
    };

    builder = match config.ip_resolve {
        IpResolve::Any => builder,
        IpResolve::V4 => builder.local_address(Some(std::net::Ipv4Addr::UNSPECIFIED.into())),
        IpResolve::V6 => builder.local_address(Some(std::net::Ipv6Addr::UNSPECIFIED.into())),
    };

    if let Some(ca) = &config.tls.ssl_ca_cert {
        let pem = std::fs::read(ca)?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| Error::BadOptArg(format!("invalid ssl_ca_cert: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) =
        (&config.tls.ssl_client_cert, &config.tls.ssl_client_key)
    {
        let mut pem = std::fs::read(cert_path)?;
        pem.extend(std::fs::read(key_path)?);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| Error::BadOptArg(format!("invalid ssl client identity: {e}")))?;
        builder = builder.identity(identity);
    }

    if let Some(proxy_url) = &config.proxy.url {
        let mut proxy =
            Proxy::all(proxy_url).map_err(|e| Error::BadOptArg(format!("bad proxy url: {e}")))?;
        if let Some(userpwd) = &config.proxy.userpwd {
            if let Some((user, pass)) = userpwd.split_once(':') {
                proxy = proxy.basic_auth(user, pass);
            }
        }
        builder = builder.proxy(proxy);
    }

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &config.extra_headers {
        let Some(value) = value else { continue };
        let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::BadOptArg(format!("bad header name {name}: {e}")))?;
        let header_value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| Error::BadOptArg(format!("bad header value for {name}: {e}")))?;
        headers.insert(header_name, header_value);
    }
    if !headers.is_empty() {
        builder = builder.default_headers(headers);
    }

    builder
        .build()
        .map_err(|e| Error::BadOptArg(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_a_client() {
        let config = HandleConfig::new();
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn bad_proxy_url_is_rejected() {
        let mut config = HandleConfig::new();
        config.proxy.url = Some("not a url".to_string());
        assert!(build_client(&config).is_err());
    }
}
