#![cfg(feature = "tls-rustls")]

mod harness;

use std::collections::HashMap;
use std::sync::Arc;

use harness::{Behavior, EventLog, serve};
use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use ws_bridge::tls::{TlsConnector, client_config, client_config_with_roots};
use ws_bridge::{
    Backend, CloseCode, Error, ReadyState, ResourceConfig, ResourceFactory, TcpConnector,
};

fn generate_test_cert() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let subject_alt_names = vec!["localhost".to_string()];
    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(subject_alt_names).unwrap();

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());

    (vec![cert_der], key_der)
}

fn create_test_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    Arc::new(config)
}

fn roots_with(cert: CertificateDer<'static>) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add(cert).unwrap();
    roots
}

/// Accept one TLS connection, read "hello" and answer "world".
async fn spawn_tls_echo(
    server_config: Arc<ServerConfig>,
) -> (u16, tokio::task::JoinHandle<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let acceptor = TlsAcceptor::from(server_config);
        let (stream, _) = listener.accept().await.unwrap();
        let Ok(mut tls_stream) = acceptor.accept(stream).await else {
            return false;
        };
        let mut buf = [0u8; 5];
        if tls_stream.read_exact(&mut buf).await.is_err() || &buf != b"hello" {
            return false;
        }
        tls_stream.write_all(b"world").await.is_ok()
    });
    (port, handle)
}

async fn exchange(connector: &TlsConnector, host: &str, port: u16) -> ws_bridge::Result<()> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut tls_stream = connector.connect(host, stream).await?;
    tls_stream.write_all(b"hello").await?;
    let mut buf = [0u8; 5];
    tls_stream.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"world");
    Ok(())
}

#[tokio::test]
async fn test_strict_handshake_with_trusted_root() {
    let (certs, key) = generate_test_cert();
    let (port, server) = spawn_tls_echo(create_test_server_config(certs.clone(), key)).await;

    let config = client_config_with_roots(roots_with(certs[0].clone()), false).unwrap();
    exchange(&TlsConnector::new(config), "localhost", port)
        .await
        .unwrap();
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn test_strict_handshake_rejects_self_signed() {
    let (certs, key) = generate_test_cert();
    let (port, server) = spawn_tls_echo(create_test_server_config(certs, key)).await;

    let result = exchange(&TlsConnector::new(client_config(false).unwrap()), "localhost", port).await;
    assert!(matches!(result, Err(Error::Tls(_))), "got {result:?}");
    assert!(!server.await.unwrap());
}

#[tokio::test]
async fn test_strict_handshake_rejects_name_mismatch() {
    let (certs, key) = generate_test_cert();
    let (port, server) = spawn_tls_echo(create_test_server_config(certs.clone(), key)).await;

    let config = client_config_with_roots(roots_with(certs[0].clone()), false).unwrap();
    let result = exchange(&TlsConnector::new(config), "127.0.0.1", port).await;
    assert!(matches!(result, Err(Error::Tls(_))), "got {result:?}");
    assert!(!server.await.unwrap());
}

#[tokio::test]
async fn test_lenient_accepts_untrusted_issuer() {
    let (certs, key) = generate_test_cert();
    let (port, server) = spawn_tls_echo(create_test_server_config(certs, key)).await;

    exchange(&TlsConnector::new(client_config(true).unwrap()), "localhost", port)
        .await
        .unwrap();
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn test_lenient_accepts_name_mismatch() {
    let (certs, key) = generate_test_cert();
    let (port, server) = spawn_tls_echo(create_test_server_config(certs.clone(), key)).await;

    let config = client_config_with_roots(roots_with(certs[0].clone()), true).unwrap();
    exchange(&TlsConnector::new(config), "127.0.0.1", port)
        .await
        .unwrap();
    assert!(server.await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_secure_resource_round_trip() {
    let (certs, key) = generate_test_cert();
    let server_config = create_test_server_config(certs.clone(), key);
    let client_config = client_config_with_roots(roots_with(certs[0].clone()), false).unwrap();
    let connector = Arc::new(TcpConnector::with_tls_config(client_config));

    for backend in [Backend::Stream, Backend::MessageSocket] {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = TlsAcceptor::from(server_config.clone());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let tls_stream = acceptor.accept(stream).await.unwrap();
            serve(tls_stream, Behavior::Echo).await
        });

        let factory = ResourceFactory::with_connector(
            ResourceConfig::new().with_backend(backend),
            connector.clone(),
        );
        let url = format!("wss://localhost:{port}/secure");
        let resource = factory.make(&url).unwrap();
        let events = EventLog::attach(resource.as_ref());

        resource.connect(&url, &[], &HashMap::new());
        resource.send("over tls");
        events.wait_for("message:8:over tls:false").await;
        resource.close(CloseCode::Normal, "");
        events.wait_for("close:").await;
        assert_eq!(resource.ready_state(), ReadyState::Closed, "{backend}");

        let seen = server.await.unwrap();
        assert_eq!(seen.texts(), vec!["over tls".to_owned()]);
        assert_eq!(seen.header("host"), Some(format!("localhost:{port}")));
        assert_eq!(seen.close_code(), Some(1000));
    }
}
