use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Body, Client, Response};

use crate::error::{DataError, Result};

const CHUNK_SIZE: usize = 1024;

fn client() -> Result<Client> {
    let builder = Client::builder().user_agent(concat!("tinykazky/", env!("CARGO_PKG_VERSION")));
    // tests talk to a loopback server and must not be routed through a proxy
    #[cfg(test)]
    let builder = builder.no_proxy();
    Ok(builder.build()?)
}

fn progress_bar(total: Option<u64>, label: &Path) -> Result<ProgressBar> {
    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(ProgressStyle::with_template(
                "{msg}: {percent}%|{wide_bar}| {bytes}/{total_bytes} [{elapsed}<{eta}, {bytes_per_sec}]",
            )?);
            bar
        }
        None => {
            let bar = ProgressBar::no_length();
            bar.set_style(ProgressStyle::with_template(
                "{msg}: {bytes} [{elapsed}, {bytes_per_sec}]",
            )?);
            bar
        }
    };
    bar.set_message(label.display().to_string());
    Ok(bar)
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        return Err(DataError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Downloads `url` to `destination` unless the destination already exists.
///
/// The body is streamed into `<destination>.part` and renamed into place once
/// complete, so an interrupted transfer never leaves a file at `destination`.
pub fn fetch(url: &str, destination: &Path) -> Result<()> {
    if destination.exists() {
        tracing::info!("{} already exists, skipping download...", destination.display());
        return Ok(());
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    tracing::info!("Downloading {url} to {}...", destination.display());
    let part = partial_path(destination);
    match stream_to(url, &part) {
        Ok(bytes) => {
            fs::rename(&part, destination)?;
            tracing::info!(bytes, "Download done.");
            Ok(())
        }
        Err(err) => {
            if part.exists() {
                tracing::warn!("removing partial download {}", part.display());
                let _ = fs::remove_file(&part);
            }
            Err(err)
        }
    }
}

fn stream_to(url: &str, path: &Path) -> Result<u64> {
    let mut response = check_status(url, client()?.get(url).send()?)?;
    let bar = progress_bar(response.content_length(), path)?;
    let mut out = BufWriter::new(File::create(path)?);
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = response.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n])?;
        written += n as u64;
        bar.inc(n as u64);
    }
    out.flush()?;
    bar.finish();
    Ok(written)
}

/// Uploads the file at `path` as the body of a PUT request to `url`.
pub fn put(path: &Path, url: &str) -> Result<()> {
    let file = File::open(path)?;
    let total = file.metadata()?.len();
    let bar = progress_bar(Some(total), path)?;
    let reader = bar.wrap_read(BufReader::with_capacity(CHUNK_SIZE, file));

    tracing::info!("Uploading {} to {url}...", path.display());
    check_status(url, client()?.put(url).body(Body::sized(reader, total)).send()?)?;
    bar.finish();
    tracing::info!(bytes = total, "Upload done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Serves a single canned response and hands back the request body.
    fn serve_once(status: &'static str, body: &'static [u8]) -> (String, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/corpus.json", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(v) = lower.strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            stream.write_all(body).unwrap();
            stream.flush().unwrap();
            request_body
        });
        (url, handle)
    }

    /// A url nothing listens on.
    fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/corpus.json")
    }

    #[test]
    fn downloads_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cache").join("kazky.json");
        let (url, server) = serve_once("200 OK", br#"[{"text": ["a"]}]"#);

        fetch(&url, &dest).unwrap();
        server.join().unwrap();
        assert_eq!(fs::read(&dest).unwrap(), br#"[{"text": ["a"]}]"#);
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn existing_destination_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("kazky.json");
        fs::write(&dest, b"cached").unwrap();

        fetch(&dead_url(), &dest).unwrap();
        fetch(&dead_url(), &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"cached");
    }

    #[test]
    fn failed_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("kazky.json");

        assert!(matches!(fetch(&dead_url(), &dest), Err(DataError::Http(_))));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn error_status_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("kazky.json");
        let (url, server) = serve_once("404 Not Found", b"missing");

        let err = fetch(&url, &dest).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, DataError::HttpStatus { status: 404, .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn put_streams_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("kazky.bin");
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &payload).unwrap();
        let (url, server) = serve_once("200 OK", b"");

        put(&src, &url).unwrap();
        assert_eq!(server.join().unwrap(), payload);
    }

    #[test]
    fn partial_path_is_a_sibling() {
        assert_eq!(
            partial_path(Path::new("data/kazky.json")),
            PathBuf::from("data/kazky.json.part")
        );
    }
}
