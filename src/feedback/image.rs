use std::fmt;
use std::path::PathBuf;

use url::Url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("An image URL or file path is required")]
    Empty,
    #[error("Unsupported URL scheme '{0}': only http and https images can be fetched")]
    UnsupportedScheme(String),
    #[error("'{0}' is neither an http(s) URL nor an existing file")]
    NotFound(String),
}

/// The photo a critique is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// A URL the chat model can fetch directly.
    Remote(Url),
    /// A file on this machine; uploads also carry the URL the facade serves them under.
    Local {
        path: PathBuf,
        public_url: Option<String>,
    },
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ImageRefError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ImageRefError::Empty);
        }

        if let Ok(url) = Url::parse(trimmed) {
            match url.scheme() {
                "http" | "https" => return Ok(ImageRef::Remote(url)),
                "file" => {
                    if let Ok(path) = url.to_file_path() {
                        return Self::local_if_exists(trimmed, path);
                    }
                }
                // Windows drive letters parse as a one-letter scheme.
                scheme if scheme.len() > 1 => {
                    return Err(ImageRefError::UnsupportedScheme(scheme.to_string()))
                }
                _ => {}
            }
        }

        Self::local_if_exists(trimmed, PathBuf::from(trimmed))
    }

    pub fn uploaded(path: PathBuf, public_url: String) -> Self {
        ImageRef::Local {
            path,
            public_url: Some(public_url),
        }
    }

    fn local_if_exists(input: &str, path: PathBuf) -> Result<Self, ImageRefError> {
        if path.is_file() {
            Ok(ImageRef::Local {
                path,
                public_url: None,
            })
        } else {
            Err(ImageRefError::NotFound(input.to_string()))
        }
    }

    /// URL the image can be retrieved from, when one exists.
    pub fn public_url(&self) -> Option<&str> {
        match self {
            ImageRef::Remote(url) => Some(url.as_str()),
            ImageRef::Local { public_url, .. } => public_url.as_deref(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.public_url(), self) {
            (Some(url), _) => write!(f, "{url}"),
            (None, ImageRef::Local { path, .. }) => write!(f, "{}", path.display()),
            (None, ImageRef::Remote(url)) => write!(f, "{url}"),
        }
    }
}
