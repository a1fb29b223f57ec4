// ABOUTME: Utility functions for SQL quoting and error handling
// ABOUTME: Provides identifier quoting, retry logic, and credential redaction

use std::fmt::Display;
use std::time::Duration;

/// Retry an async operation with exponential backoff
///
/// Runs `operation` until it succeeds or `max_retries` additional attempts
/// have failed. The delay doubles after each failure.
///
/// # Arguments
///
/// * `operation` - Async function to retry
/// * `max_retries` - Maximum number of retry attempts (0 = run once)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
///
/// # Returns
///
/// The first successful result, or the last error after all retries are exhausted.
///
/// # Examples
///
/// ```no_run
/// # use std::time::Duration;
/// # use mysql_syncer::utils::retry_with_backoff;
/// # async fn example() -> anyhow::Result<()> {
/// let result = retry_with_backoff(
///     || async { Ok::<_, anyhow::Error>("success") },
///     3,  // Try up to 3 times
///     Duration::from_secs(1)  // Start with 1s delay
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries => {
                tracing::warn!(
                    "Operation failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt + 1,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2; // Exponential backoff
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Quote a MySQL identifier (database, table, column)
///
/// MySQL uses backticks for identifier quoting. Escapes embedded backticks
/// by doubling them.
///
/// # Examples
///
/// ```
/// use mysql_syncer::utils::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("users"), "`users`");
/// assert_eq!(quote_mysql_ident("user`name"), "`user``name`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' {
            quoted.push('`');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}

/// Quote a list of identifiers and join them with `, `.
pub fn quote_mysql_ident_list(identifiers: &[String]) -> String {
    identifiers
        .iter()
        .map(|c| quote_mysql_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Remove the password from a `mysql://` URL so it can be logged
///
/// Strings that don't look like URLs are returned unchanged.
///
/// # Examples
///
/// ```
/// use mysql_syncer::utils::strip_password_from_url;
/// assert_eq!(
///     strip_password_from_url("mysql://root:secret@db:3306/app"),
///     "mysql://root@db:3306/app"
/// );
/// ```
pub fn strip_password_from_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host_part)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    let user = credentials.split(':').next().unwrap_or_default();
    format!("{}://{}@{}", scheme, user, host_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_mysql_ident() {
        assert_eq!(quote_mysql_ident("logs"), "`logs`");
        assert_eq!(quote_mysql_ident("weird`name"), "`weird``name`");
        assert_eq!(quote_mysql_ident(""), "``");
    }

    #[test]
    fn test_quote_mysql_ident_list() {
        let cols = vec!["id".to_string(), "message".to_string()];
        assert_eq!(quote_mysql_ident_list(&cols), "`id`, `message`");
    }

    #[test]
    fn test_strip_password_from_url() {
        assert_eq!(
            strip_password_from_url("mysql://user:p@ss@host:3306/db"),
            "mysql://user@host:3306/db"
        );
        assert_eq!(
            strip_password_from_url("mysql://user@host/db"),
            "mysql://user@host/db"
        );
        assert_eq!(strip_password_from_url("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_retry_with_backoff_success() {
        let mut attempts = 0;
        let result = retry_with_backoff(
            || {
                attempts += 1;
                async move {
                    if attempts < 3 {
                        anyhow::bail!("Temporary failure")
                    } else {
                        Ok("Success")
                    }
                }
            },
            5,
            Duration::from_millis(10),
        )
        .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_failure() {
        let mut attempts = 0;
        let result: anyhow::Result<&str> = retry_with_backoff(
            || {
                attempts += 1;
                async move { anyhow::bail!("Permanent failure") }
            },
            2,
            Duration::from_millis(10),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 3); // Initial + 2 retries
    }
}
