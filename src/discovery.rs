//! XMPP server discovery via DNS SRV records
//!
//! When the configuration does not name a host, the client service record
//! of the account's domain decides where to connect. Discovery failure is
//! never fatal: the caller gets the bare domain back and connects to it on
//! the default port.

use std::cmp::Reverse;
use std::future::Future;

use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::{Error, Result};

/// SRV service name for client-to-server XMPP connections
pub const XMPP_CLIENT_SERVICE: &str = "xmpp-client";
pub const SRV_PROTOCOL: &str = "tcp";

/// One SRV answer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

impl SrvTarget {
    pub fn new(target: &str, port: u16) -> Self {
        Self {
            target: target.to_string(),
            port,
            priority: 0,
            weight: 0,
        }
    }
}

/// Source of SRV records.
pub trait SrvResolver {
    /// Look up `_<service>._<protocol>.<domain>` and return every record.
    fn lookup_srv(
        &self,
        service: &str,
        protocol: &str,
        domain: &str,
    ) -> impl Future<Output = Result<Vec<SrvTarget>>>;
}

/// Resolver backed by the system DNS configuration (`/etc/resolv.conf`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl SrvResolver for SystemResolver {
    async fn lookup_srv(
        &self,
        service: &str,
        protocol: &str,
        domain: &str,
    ) -> Result<Vec<SrvTarget>> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Discovery(format!("Failed to load resolver config: {}", e)))?;

        let name = srv_query_name(service, protocol, domain);
        let lookup = resolver
            .srv_lookup(name.clone())
            .await
            .map_err(|e| Error::Discovery(format!("{}: {}", name, e)))?;

        Ok(lookup
            .iter()
            .map(|srv| SrvTarget {
                target: srv.target().to_utf8(),
                port: srv.port(),
                priority: srv.priority(),
                weight: srv.weight(),
            })
            .collect())
    }
}

/// Fully qualified SRV query name, e.g. `_xmpp-client._tcp.example.org.`
pub fn srv_query_name(service: &str, protocol: &str, domain: &str) -> String {
    format!("_{}._{}.{}.", service, protocol, domain.trim_end_matches('.'))
}

/// Pick the preferred record and format it as `host:port`.
///
/// Lowest priority wins, ties go to the highest weight. A target of `.`
/// means the service is explicitly unavailable and is skipped.
pub fn select_target(records: &[SrvTarget]) -> Option<String> {
    records
        .iter()
        .filter(|r| !r.target.trim_end_matches('.').is_empty())
        .min_by_key(|r| (r.priority, Reverse(r.weight)))
        .map(|r| format!("{}:{}", r.target.trim_end_matches('.'), r.port))
}

/// Resolve the server address for `domain`.
///
/// Performs exactly one SRV lookup. On success returns `host:port` of the
/// preferred record; on any lookup error or an empty answer returns
/// `domain` unchanged (no port). The failure is only logged at debug level.
pub async fn resolve_server_address<R: SrvResolver>(domain: &str, resolver: &R) -> String {
    match resolver
        .lookup_srv(XMPP_CLIENT_SERVICE, SRV_PROTOCOL, domain)
        .await
    {
        Ok(records) => match select_target(&records) {
            Some(address) => {
                debug!(%domain, %address, "Resolved XMPP server via SRV");
                address
            }
            None => {
                debug!(%domain, "No usable SRV records, using domain");
                domain.to_string()
            }
        },
        Err(e) => {
            debug!(%domain, error = %e, "SRV lookup failed, using domain");
            domain.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    enum Answer {
        Records(Vec<SrvTarget>),
        Fail,
    }

    struct FakeResolver {
        answer: Answer,
        queries: RefCell<Vec<String>>,
    }

    impl FakeResolver {
        fn new(answer: Answer) -> Self {
            Self {
                answer,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl SrvResolver for FakeResolver {
        async fn lookup_srv(
            &self,
            service: &str,
            protocol: &str,
            domain: &str,
        ) -> Result<Vec<SrvTarget>> {
            self.queries
                .borrow_mut()
                .push(srv_query_name(service, protocol, domain));
            match &self.answer {
                Answer::Records(records) => Ok(records.clone()),
                Answer::Fail => Err(Error::Discovery("NXDOMAIN".into())),
            }
        }
    }

    #[test]
    fn srv_query_name_is_absolute() {
        assert_eq!(
            srv_query_name("xmpp-client", "tcp", "example.org"),
            "_xmpp-client._tcp.example.org."
        );
        assert_eq!(
            srv_query_name("xmpp-client", "tcp", "example.org."),
            "_xmpp-client._tcp.example.org."
        );
    }

    #[test]
    fn select_target_prefers_priority_then_weight() {
        let records = vec![
            SrvTarget {
                target: "backup.example.org.".into(),
                port: 5223,
                priority: 20,
                weight: 100,
            },
            SrvTarget {
                target: "light.example.org.".into(),
                port: 5222,
                priority: 10,
                weight: 5,
            },
            SrvTarget {
                target: "heavy.example.org.".into(),
                port: 5222,
                priority: 10,
                weight: 50,
            },
        ];
        assert_eq!(
            select_target(&records).as_deref(),
            Some("heavy.example.org:5222")
        );
    }

    #[test]
    fn select_target_skips_unavailable_marker() {
        let records = vec![SrvTarget::new(".", 0)];
        assert_eq!(select_target(&records), None);
        assert_eq!(select_target(&[]), None);
    }

    #[tokio::test]
    async fn resolve_uses_srv_record() {
        let resolver = FakeResolver::new(Answer::Records(vec![SrvTarget::new(
            "xmpp.example.org.",
            5222,
        )]));
        let address = resolve_server_address("example.org", &resolver).await;
        assert_eq!(address, "xmpp.example.org:5222");
        assert_eq!(
            resolver.queries.borrow().as_slice(),
            ["_xmpp-client._tcp.example.org."]
        );
    }

    #[tokio::test]
    async fn resolve_falls_back_to_domain_on_error() {
        let resolver = FakeResolver::new(Answer::Fail);
        let address = resolve_server_address("example.org", &resolver).await;
        assert_eq!(address, "example.org");
        assert_eq!(resolver.queries.borrow().len(), 1);
    }

    #[tokio::test]
    async fn resolve_falls_back_to_domain_on_empty_answer() {
        let resolver = FakeResolver::new(Answer::Records(vec![]));
        assert_eq!(
            resolve_server_address("example.org", &resolver).await,
            "example.org"
        );
    }

    #[tokio::test]
    async fn system_resolver_falls_back_for_reserved_tld() {
        // .invalid never resolves; without network the lookup errors instead
        let address = resolve_server_address("nothing-here.invalid", &SystemResolver).await;
        assert_eq!(address, "nothing-here.invalid");
    }
}
