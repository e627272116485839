//! Store origin extraction.

/// Scheme+host origin of a store URL.
///
/// Given `"https://shop.example.com/collections/all"`, returns
/// `"https://shop.example.com"`, so storefront endpoints are always built
/// from the store root whatever path `base_url` carries.
#[must_use]
pub fn extract_store_origin(base_url: &str) -> String {
    reqwest::Url::parse(base_url).map_or_else(
        |e| {
            tracing::warn!(
                base_url,
                error = %e,
                "could not parse base_url; falling back to string split for origin"
            );
            base_url
                .trim_end_matches('/')
                .splitn(4, '/')
                .take(3)
                .collect::<Vec<_>>()
                .join("/")
        },
        |u| u.origin().ascii_serialization(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_path() {
        assert_eq!(
            extract_store_origin("https://shop.example.com/collections/all"),
            "https://shop.example.com"
        );
    }

    #[test]
    fn keeps_port() {
        assert_eq!(
            extract_store_origin("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn trailing_slash() {
        assert_eq!(
            extract_store_origin("https://shop.example.com/"),
            "https://shop.example.com"
        );
    }
}
