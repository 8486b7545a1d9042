//! Bearer credential resolution.

use std::io;
use std::path::Path;

/// Default path for service-account tokens when running inside a cluster.
const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Errors produced by bearer token resolution.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An explicitly configured token file could not be read.
    #[error("failed to read token from {path}: {source}")]
    TokenFile {
        /// The configured path.
        path: String,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Resolve a bearer token, trying in priority order:
///
/// 1. the explicit token literal,
/// 2. the configured token file path,
/// 3. the well-known service-account token path,
/// 4. empty, meaning unauthenticated.
///
/// # Errors
///
/// Only an explicitly configured token file that exists but cannot be read
/// is an error; a missing service-account token silently falls through to
/// unauthenticated.
pub fn resolve_bearer_token(token: &str, token_file: &str) -> Result<String, Error> {
    if !token.is_empty() {
        return Ok(token.trim().to_string());
    }

    if !token_file.is_empty() {
        let contents = read_token_file(token_file).map_err(|source| Error::TokenFile {
            path: token_file.to_string(),
            source,
        })?;
        if !contents.is_empty() {
            return Ok(contents);
        }
    }

    if let Ok(contents) = read_token_file(SERVICE_ACCOUNT_TOKEN_PATH) {
        if !contents.is_empty() {
            return Ok(contents);
        }
    }

    Ok(String::new())
}

fn read_token_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_token_wins() {
        let token = resolve_bearer_token("  secret-token \n", "/does/not/exist").expect("resolve");
        assert_eq!(token, "secret-token");
    }

    #[test]
    fn missing_file_falls_through_to_unauthenticated() {
        let token = resolve_bearer_token("", "/does/not/exist/token").expect("resolve");
        assert_eq!(token, "");
    }

    #[test]
    fn file_contents_are_trimmed() {
        let dir = std::env::temp_dir().join("ballast-auth-test");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("token");
        std::fs::write(&path, "  file-token\n").expect("write");

        let token =
            resolve_bearer_token("", path.to_str().expect("utf-8 path")).expect("resolve");
        assert_eq!(token, "file-token");

        std::fs::remove_file(&path).ok();
    }
}
