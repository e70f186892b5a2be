use crate::backend::RateLimitInput;
use crate::policy::RateLimitPolicy;
use actix_web::dev::{ConnectionInfo, ServiceRequest};
use actix_web::ResponseError;
use std::future::{ready, Ready};
use std::net::{AddrParseError, IpAddr, Ipv6Addr, SocketAddr};
use thiserror::Error;

type CustomFn = Box<dyn Fn(&ServiceRequest) -> Result<String, actix_web::Error>>;

pub type RateLimitInputFuture = Ready<Result<RateLimitInput, actix_web::Error>>;

const KEY_SEPARATOR: &str = ":";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unable to parse remote IP address: {0}")]
    InvalidIp(
        #[source]
        #[from]
        AddrParseError,
    ),
    #[error("Unable to determine the client address")]
    MissingClientAddress,
    #[error("Missing path parameter '{0}' for the rate limit key")]
    MissingPathParameter(String),
}

impl ResponseError for Error {}

/// Where to take the client's address from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClientIp {
    /// The address reported by a trusted proxy, see
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr).
    ///
    /// # Security
    ///
    /// Only suitable for applications deployed behind a proxy that you control.
    Real,
    /// The address of the connected socket.
    Peer,
}

/// Resolves the client identity used in rate limit keys.
///
/// IPv6 addresses are grouped into a single identity per /64.
pub fn client_ip(info: &ConnectionInfo, source: ClientIp) -> Result<String, Error> {
    let addr = match source {
        ClientIp::Real => info.realip_remote_addr(),
        ClientIp::Peer => info.peer_addr(),
    };
    ip_key(addr.ok_or(Error::MissingClientAddress)?)
}

/// A colon delimited rate limit key, such as `property-view:<ip>:<property id>`.
#[derive(Debug, Clone, Default)]
pub struct RateLimitKey {
    components: Vec<String>,
}

impl RateLimitKey {
    pub fn new(prefix: &str) -> Self {
        Self::default().push(prefix)
    }

    pub fn push(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    /// Adds an email address, case folded so that `A@x.com` and `a@x.com` share a quota.
    pub fn email(self, email: &str) -> Self {
        self.push(email.trim().to_lowercase())
    }

    pub fn client_ip(self, info: &ConnectionInfo, source: ClientIp) -> Result<Self, Error> {
        Ok(self.push(client_ip(info, source)?))
    }

    pub fn build(self) -> String {
        self.components.join(KEY_SEPARATOR)
    }
}

/// Utility to create an input function for the [RateLimiter](crate::RateLimiter) middleware.
///
/// You should take care to ensure that you are producing unique keys per policy, usually by
/// starting with a [custom_key](Self::custom_key).
///
/// Components are added in a fixed order: custom key, client IP, path, path parameters, custom
/// function.
pub struct InputFunctionBuilder {
    policy: RateLimitPolicy,
    custom_key: Option<String>,
    client_ip: Option<ClientIp>,
    path_key: bool,
    match_info_keys: Vec<String>,
    custom_fn: Option<CustomFn>,
}

impl InputFunctionBuilder {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            custom_key: None,
            client_ip: None,
            path_key: false,
            match_info_keys: Vec::new(),
            custom_fn: None,
        }
    }

    /// Adds the client's real IP to the rate limiting key, see [ClientIp::Real].
    pub fn real_ip_key(mut self) -> Self {
        self.client_ip = Some(ClientIp::Real);
        self
    }

    /// Adds the connection peer IP to the rate limiting key.
    ///
    /// This is suitable when clients connect directly to the application.
    pub fn peer_ip_key(mut self) -> Self {
        self.client_ip = Some(ClientIp::Peer);
        self
    }

    /// Add the request path to the rate limiting key
    pub fn path_key(mut self) -> Self {
        self.path_key = true;
        self
    }

    /// Add a matched path parameter (e.g. the `id` of `/properties/{id}/view`) to the key.
    ///
    /// The middleware must wrap the resource or scope that declares the parameter.
    pub fn match_info_key(mut self, name: &str) -> Self {
        self.match_info_keys.push(name.to_owned());
        self
    }

    /// Add a custom component to the rate limiting key
    pub fn custom_key(mut self, key: &str) -> Self {
        self.custom_key = Some(key.to_owned());
        self
    }

    /// Dynamically add a custom component to the rate limiting key
    pub fn custom_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Result<String, actix_web::Error> + 'static,
    {
        self.custom_fn = Some(Box::new(f));
        self
    }

    pub fn build(self) -> impl Fn(&ServiceRequest) -> RateLimitInputFuture + 'static {
        move |req| ready(self.input(req))
    }

    fn input(&self, req: &ServiceRequest) -> Result<RateLimitInput, actix_web::Error> {
        let mut key = RateLimitKey::default();
        if let Some(custom) = &self.custom_key {
            key = key.push(custom.as_str());
        }
        if let Some(source) = self.client_ip {
            key = key.client_ip(&req.connection_info(), source)?;
        }
        if self.path_key {
            key = key.push(req.path());
        }
        for name in &self.match_info_keys {
            let value = req
                .match_info()
                .get(name)
                .ok_or_else(|| Error::MissingPathParameter(name.clone()))?;
            key = key.push(value);
        }
        if let Some(f) = &self.custom_fn {
            key = key.push(f(req)?);
        }
        Ok(RateLimitInput {
            key: key.build(),
            policy: self.policy,
        })
    }
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
fn ip_key(ip_str: &str) -> Result<String, Error> {
    let ip = match ip_str.parse::<IpAddr>() {
        Ok(ip) => ip,
        // Forwarding headers occasionally carry a port
        Err(e) => ip_str.parse::<SocketAddr>().map_err(|_| e)?.ip(),
    };
    Ok(match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return Ok(v4.to_string());
            }
            let s = v6.segments();
            let subnet = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
            format!("{}/64", subnet)
        }
    })
}
