//! Freshness and cacheability rules.

use std::time::Duration;

use regex::RegexSet;

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::request::{Destination, Request, RequestClassification};

/// Allow-list of external URLs whose responses may be stored.
#[derive(Debug, Clone)]
pub struct TrustedHosts {
    patterns: RegexSet,
}

impl TrustedHosts {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns =
            RegexSet::new(patterns).map_err(|e| CacheError::InvalidPattern(e.to_string()))?;
        Ok(Self { patterns })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.trusted_patterns)
    }

    pub fn is_trusted(&self, url: &str) -> bool {
        self.patterns.is_match(url)
    }
}

/// How long an entry of the given destination stays fresh.
pub fn max_age(destination: Destination, config: &Config) -> Duration {
    match destination {
        Destination::Image => config.image_max_age,
        _ => config.default_max_age,
    }
}

/// Images and fonts are always cacheable, as is anything from our own
/// origin. Everything else must match a trusted pattern.
pub fn classify(
    request: &Request,
    config: &Config,
    trusted: &TrustedHosts,
) -> RequestClassification {
    let same_origin = request.is_same_origin(&config.origin);
    let cacheable = matches!(request.destination, Destination::Image | Destination::Font)
        || same_origin
        || trusted.is_trusted(request.url.as_str());
    RequestClassification {
        destination: request.destination,
        same_origin,
        cacheable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn config() -> Config {
        Config::for_origin(Url::parse("https://itswatuyusei.github.io").unwrap())
    }

    fn classify_url(url: &str, destination: Destination) -> RequestClassification {
        let config = config();
        let trusted = TrustedHosts::from_config(&config).unwrap();
        classify(&Request::parse(url, destination).unwrap(), &config, &trusted)
    }

    #[test]
    fn test_max_age_by_destination() {
        let config = config();
        assert_eq!(max_age(Destination::Image, &config), Duration::from_secs(86_400));
        assert_eq!(max_age(Destination::Font, &config), Duration::from_secs(3_600));
        assert_eq!(max_age(Destination::Document, &config), Duration::from_secs(3_600));
        assert_eq!(max_age(Destination::Other, &config), Duration::from_secs(3_600));
    }

    #[test]
    fn test_same_origin_is_cacheable() {
        let c = classify_url("https://itswatuyusei.github.io/style.css", Destination::Other);
        assert!(c.same_origin);
        assert!(c.cacheable);
    }

    #[test]
    fn test_images_and_fonts_are_cacheable_anywhere() {
        assert!(classify_url("https://random.example/pic.jpg", Destination::Image).cacheable);
        assert!(classify_url("https://random.example/f.woff2", Destination::Font).cacheable);
    }

    #[test]
    fn test_trusted_hosts() {
        for trusted in [
            "https://fonts.googleapis.com/css2?family=Inter",
            "https://cdnjs.cloudflare.com/ajax/libs/x.js",
            "https://fonts.gstatic.com/s/inter.woff2",
            "https://ik.imagekit.io/ItsWatuyusei/Image/a.png",
        ] {
            assert!(classify_url(trusted, Destination::Other).cacheable, "{}", trusted);
        }
    }

    #[test]
    fn test_untrusted_cross_origin_is_not_cacheable() {
        let c = classify_url("https://api.hubspot.com/track.js", Destination::Other);
        assert!(!c.same_origin);
        assert!(!c.cacheable);
        // Anchored patterns: the trusted host must start the URL
        let smuggled = "https://evil.example/?u=https://cdnjs.cloudflare.com";
        assert!(!classify_url(smuggled, Destination::Document).cacheable);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(TrustedHosts::new(["(unclosed"]).is_err());
    }
}
