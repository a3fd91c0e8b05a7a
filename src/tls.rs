/*
 * vinmail embeddable SMTP receiver
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// Certificate provider consulted at handshake time: picks a certified
/// key from the TLS client hello.
pub type CertProvider = Box<
    dyn Fn(&rustls::server::ClientHello<'_>) -> Option<std::sync::Arc<rustls::sign::CertifiedKey>>
        + Send
        + Sync,
>;

fn get_signing_key_from_file(
    key_path: &std::path::Path,
) -> anyhow::Result<std::sync::Arc<dyn rustls::sign::SigningKey>> {
    let mut reader = std::io::BufReader::new(
        std::fs::File::open(key_path).map_err(|e| anyhow::anyhow!("{e}: '{}'", key_path.display()))?,
    );

    let private_keys = rustls_pemfile::read_one(&mut reader)?
        .into_iter()
        .filter_map(|item| match item {
            rustls_pemfile::Item::RSAKey(der)
            | rustls_pemfile::Item::PKCS8Key(der)
            | rustls_pemfile::Item::ECKey(der) => Some(rustls::PrivateKey(der)),
            _ => None,
        })
        .collect::<Vec<_>>();

    private_keys.first().map_or_else(
        || anyhow::bail!("private key missing in file: '{}'", key_path.display()),
        |key| {
            rustls::sign::any_supported_type(key)
                .map_err(|_| anyhow::anyhow!("cannot parse signing key: '{}'", key_path.display()))
        },
    )
}

/// Load the certificate chain of a PEM file.
///
/// # Errors
///
/// * the file cannot be opened or holds no certificate
pub fn get_cert_from_file(
    fullchain_path: &std::path::Path,
) -> anyhow::Result<Vec<rustls::Certificate>> {
    let mut reader = std::io::BufReader::new(
        std::fs::File::open(fullchain_path)
            .map_err(|e| anyhow::anyhow!("{e}: '{}'", fullchain_path.display()))?,
    );

    match rustls_pemfile::certs(&mut reader).map(|certs| {
        certs
            .into_iter()
            .map(rustls::Certificate)
            .collect::<Vec<_>>()
    })? {
        empty if empty.is_empty() => Err(anyhow::anyhow!(
            "certificate file is empty: '{}'",
            fullchain_path.display()
        )),
        otherwise => Ok(otherwise),
    }
}

struct TlsLogger;

impl rustls::KeyLog for TlsLogger {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        log::trace!("{} {:?} {:?}", label, client_random, secret);
    }
}

struct CertResolver {
    provider: Option<CertProvider>,
    cert: Option<std::sync::Arc<rustls::sign::CertifiedKey>>,
}

impl rustls::server::ResolvesServerCert for CertResolver {
    fn resolve(
        &self,
        client_hello: rustls::server::ClientHello<'_>,
    ) -> Option<std::sync::Arc<rustls::sign::CertifiedKey>> {
        self.provider
            .as_ref()
            .and_then(|provider| provider(&client_hello))
            .or_else(|| self.cert.clone())
    }
}

/// Build a rustls server configuration from a PEM certificate chain and
/// private key.
///
/// # Errors
///
/// * certificate or key cannot be loaded
pub fn get_rustls_config(
    fullchain: &std::path::Path,
    private_key: &std::path::Path,
) -> anyhow::Result<rustls::ServerConfig> {
    let cert = std::sync::Arc::new(rustls::sign::CertifiedKey {
        cert: get_cert_from_file(fullchain)?,
        key: get_signing_key_from_file(private_key)?,
        ocsp: None,
        sct_list: None,
    });
    Ok(assemble(CertResolver {
        provider: None,
        cert: Some(cert),
    }))
}

/// Build a rustls server configuration around a custom certificate
/// provider, e.g. for SNI-dependent certificates. The `fallback` is
/// used when the provider declines.
#[must_use]
pub fn get_rustls_config_with_provider(
    provider: CertProvider,
    fallback: Option<std::sync::Arc<rustls::sign::CertifiedKey>>,
) -> rustls::ServerConfig {
    assemble(CertResolver {
        provider: Some(provider),
        cert: fallback,
    })
}

fn assemble(resolver: CertResolver) -> rustls::ServerConfig {
    let mut out = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_cert_resolver(std::sync::Arc::new(resolver));

    out.key_log = std::sync::Arc::new(TlsLogger {});
    out
}
