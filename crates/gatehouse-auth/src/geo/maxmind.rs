//! MaxMind GeoLite2/GeoIP2 City database.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use maxminddb::{MaxMindDBError, Reader, geoip2};

use super::{GeoDatabase, GeoRecord};
use crate::error::{AuthorityError, AuthorityResult};

pub struct MaxMindDatabase {
    reader: Reader<Vec<u8>>,
}

impl MaxMindDatabase {
    /// Opens an `.mmdb` file. The format is only validated by opening it.
    pub fn open(path: impl AsRef<Path>) -> AuthorityResult<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            AuthorityError::geo(format!("failed to open {}: {e}", path.display()))
        })?;
        Ok(Self { reader })
    }
}

impl GeoDatabase for MaxMindDatabase {
    fn lookup(&self, ip: IpAddr) -> AuthorityResult<Option<GeoRecord>> {
        let city: geoip2::City = match self.reader.lookup(ip) {
            Ok(city) => city,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => return Err(AuthorityError::geo(e.to_string())),
        };

        let country = city.country.as_ref();
        Ok(Some(GeoRecord {
            city_names: owned_names(city.city.as_ref().and_then(|c| c.names.as_ref())),
            country_names: owned_names(country.and_then(|c| c.names.as_ref())),
            country_code: country.and_then(|c| c.iso_code).map(str::to_string),
        }))
    }
}

fn owned_names(names: Option<&BTreeMap<&str, &str>>) -> BTreeMap<String, String> {
    names
        .map(|names| {
            names
                .iter()
                .map(|(lang, name)| (lang.to_string(), name.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_missing_file() {
        let err = MaxMindDatabase::open("/nonexistent/GeoLite2-City.mmdb")
            .err()
            .unwrap();
        assert!(matches!(err, AuthorityError::Geo { .. }));
    }

    #[test]
    fn test_open_garbage_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a maxmind database").unwrap();
        assert!(MaxMindDatabase::open(file.path()).is_err());
    }

    #[test]
    fn test_owned_names() {
        let names = BTreeMap::from([("en", "Paris"), ("fr", "Paris")]);
        let owned = owned_names(Some(&names));
        assert_eq!(owned.get("en").map(String::as_str), Some("Paris"));
        assert!(owned_names(None).is_empty());
    }
}
