//! The interactive browser step of sign-in.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use url::Url;

use super::error::AuthError;

/// Shows the authorization URL to the user and yields the final redirect URL.
///
/// Implementations return [`AuthError::Cancelled`] when the user dismisses the
/// browser without completing authorization.
#[async_trait]
pub trait BrowserPresenter: Send + Sync {
    async fn present(&self, authorize_url: &Url) -> Result<String, AuthError>;
}

/// Prints the URL and reads the pasted redirect URL from a line reader.
///
/// An empty line or end of input counts as cancellation.
pub struct ReaderPresenter<R> {
    reader: Mutex<R>,
}

impl ReaderPresenter<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> ReaderPresenter<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl<R> BrowserPresenter for ReaderPresenter<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn present(&self, authorize_url: &Url) -> Result<String, AuthError> {
        eprintln!("Open this URL in your browser to sign in:\n\n  {authorize_url}\n");
        eprintln!("Then paste the URL you were redirected to (empty line to cancel):");
        let mut line = String::new();
        let read = self.reader.lock().await.read_line(&mut line).await?;
        let callback = line.trim();
        if read == 0 || callback.is_empty() {
            return Err(AuthError::Cancelled);
        }
        Ok(callback.to_string())
    }
}
