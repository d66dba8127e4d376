//! Get command

use anyhow::{Context, Result, bail};
use std::io::Write;
use tracing::info;

use unpkg_core::{Config, Resolution, Unpkg};
use unpkg_schema::PackageRef;

use crate::listing;

/// Resolve `identifier` once and print the file or directory listing.
pub async fn get(config: &Config, identifier: &str) -> Result<()> {
    let unpkg = Unpkg::from_config(config).context("Failed to build HTTP client")?;
    let result = fetch(&unpkg, identifier).await;
    unpkg.shutdown().await;

    std::io::stdout()
        .write_all(&result?)
        .context("Failed to write output")
}

async fn fetch(unpkg: &Unpkg, identifier: &str) -> Result<Vec<u8>> {
    let req = PackageRef::parse(identifier)?;

    let resolution = match unpkg.resolve_and_ensure_local(&req).await? {
        Resolution::Redirect(pinned) => {
            info!(from = %req, to = %pinned, "Following redirect");
            unpkg.resolve_and_ensure_local(&pinned).await?
        }
        local @ Resolution::Local(_) => local,
    };
    let Resolution::Local(target) = resolution else {
        bail!("'{identifier}' did not resolve to a concrete version");
    };

    let meta = tokio::fs::metadata(&target.path)
        .await
        .with_context(|| format!("Cannot find {}", target.path.display()))?;

    if meta.is_dir() {
        Ok(listing::render(&target.path).await?.into_bytes())
    } else if target.is_directory {
        bail!("{} is not a directory", target.path.display());
    } else {
        Ok(tokio::fs::read(&target.path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use mockito::Server;
    use std::time::Duration;
    use unpkg_schema::{Algorithm, Integrity};

    fn tarball() -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in [
            ("node/index.js", "module.exports = 42;"),
            ("node/lib/a.js", "a"),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, data.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn follows_redirect_and_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let tgz = tarball();
        let shasum = Integrity::compute(Algorithm::Sha1, &tgz);

        let mut server = Server::new_async().await;
        let doc = format!(
            r#"{{"version":"2.1.0","dist":{{"shasum":"{shasum}","tarball":"{}/answer.tgz"}}}}"#,
            server.url(),
            shasum = shasum.as_str(),
        );
        let _major = server
            .mock("GET", "/answer/2")
            .with_status(200)
            .with_body(&doc)
            .create_async()
            .await;
        let _tgz = server
            .mock("GET", "/answer.tgz")
            .with_status(200)
            .with_body(tgz)
            .expect(1)
            .create_async()
            .await;

        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            registry_url: server.url(),
            sweep_interval: Duration::ZERO,
            ..Config::default()
        };
        let unpkg = Unpkg::from_config(&config).unwrap();

        let out = fetch(&unpkg, "answer@2/index.js").await.unwrap();
        assert_eq!(out, b"module.exports = 42;");

        let out = fetch(&unpkg, "answer@2.1.0/").await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "index.js\nlib/\n");
    }
}
