//! Shared TLS fixtures.

use std::{sync::Arc, time::Duration};

use ironwire_net::{RustlsEngine, load_certs, load_private_key};
use rustls::{ClientConfig, RootCertStore, ServerConfig, crypto::ring, pki_types::ServerName};

/// Client and server configs sharing one self-signed `localhost` certificate.
pub struct TlsConfigs {
    pub client: Arc<ClientConfig>,
    pub server: Arc<ServerConfig>,
}

impl TlsConfigs {
    pub fn localhost() -> Self {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let certs = load_certs(&mut generated.cert.pem().as_bytes()).unwrap();
        let key = load_private_key(&mut generated.key_pair.serialize_pem().as_bytes()).unwrap();

        let provider = Arc::new(ring::default_provider());
        let server = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(certs.clone(), key)
            .unwrap();

        let mut roots = RootCertStore::empty();
        roots.add(certs[0].clone()).unwrap();
        let client = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self { client: Arc::new(client), server: Arc::new(server) }
    }

    pub fn client_engine(&self) -> RustlsEngine {
        let name = ServerName::try_from("localhost").unwrap();
        RustlsEngine::client(Arc::clone(&self.client), name).unwrap()
    }

    pub fn server_engine(&self) -> RustlsEngine {
        RustlsEngine::server(Arc::clone(&self.server)).unwrap()
    }
}

/// Poll `check` until it holds, failing after five seconds.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
