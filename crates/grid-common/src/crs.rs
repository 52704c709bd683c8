//! Coordinate Reference System types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Geocentric or ellipsoidal 3D codes inside the EPSG geodetic block.
const GEOCENTRIC_OR_3D_CODES: [u32; 6] = [4328, 4329, 4930, 4936, 4978, 4979];

/// CRS attached to a normalized variable.
///
/// Gridded datasets either name an EPSG code or carry a full WKT string in
/// their grid-mapping attributes. Anything else is treated as unknown and the
/// caller falls back to [`Crs::default`] (geographic WGS84).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    Epsg(u32),
    Wkt(String),
}

impl Default for Crs {
    fn default() -> Self {
        Crs::Epsg(4326)
    }
}

impl Crs {
    /// Parse a CRS definition found in dataset metadata.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326" / "epsg:4326"
    /// - "CRS:84" (equivalent to EPSG:4326 with lon/lat axis order)
    /// - "4326"
    /// - a WKT1 or WKT2 string (GEOGCS, PROJCS, GEOGCRS, PROJCRS, ...)
    pub fn parse(s: &str) -> Result<Self, CrsParseError> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();

        if upper == "CRS:84" || upper == "OGC:CRS84" {
            return Ok(Crs::Epsg(4326));
        }

        if let Some(code) = upper.strip_prefix("EPSG:") {
            return code
                .parse()
                .map(Crs::Epsg)
                .map_err(|_| CrsParseError::Unrecognized(s.to_string()));
        }

        if let Ok(code) = upper.parse::<u32>() {
            return Ok(Crs::Epsg(code));
        }

        const WKT_KEYWORDS: [&str; 7] = [
            "GEOGCS", "PROJCS", "GEOCCS", "COMPD_CS", "GEOGCRS", "PROJCRS", "GEODCRS",
        ];
        if WKT_KEYWORDS.iter().any(|kw| upper.starts_with(kw)) {
            return Ok(Crs::Wkt(trimmed.to_string()));
        }

        Err(CrsParseError::Unrecognized(s.to_string()))
    }

    /// Check if this is a geographic (lat/lon) CRS.
    ///
    /// EPSG codes 4000-4999 are geodetic CRSs; the geocentric and 3D ones in
    /// that block are excluded. WKT is geographic when its root is a GEOGCS,
    /// GEOGCRS, or a GEODCRS without a Cartesian coordinate system.
    pub fn is_geographic(&self) -> bool {
        match self {
            Crs::Epsg(code) => {
                (4000..5000).contains(code) && !GEOCENTRIC_OR_3D_CODES.contains(code)
            }
            Crs::Wkt(wkt) => {
                let upper = wkt.trim_start().to_uppercase();
                upper.starts_with("GEOGCS")
                    || upper.starts_with("GEOGCRS")
                    || (upper.starts_with("GEODCRS") && !upper.contains("CS[CARTESIAN"))
            }
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Wkt(wkt) => write!(f, "{}", wkt),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unrecognized CRS: {0}")]
    Unrecognized(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crs() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::Epsg(4326));
        assert_eq!(Crs::parse("epsg:3857").unwrap(), Crs::Epsg(3857));
        assert_eq!(Crs::parse("CRS:84").unwrap(), Crs::Epsg(4326));
        assert_eq!(Crs::parse("32633").unwrap(), Crs::Epsg(32633));
        assert!(Crs::parse("EPSG:abc").is_err());
        assert!(Crs::parse("not a crs").is_err());
    }

    #[test]
    fn test_parse_wkt() {
        let wkt = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]]]"#;
        let crs = Crs::parse(wkt).unwrap();
        assert!(matches!(crs, Crs::Wkt(_)));
        assert!(crs.is_geographic());
    }

    #[test]
    fn test_default_is_wgs84() {
        assert_eq!(Crs::default(), Crs::Epsg(4326));
        assert_eq!(Crs::default().to_string(), "EPSG:4326");
        assert!(!Crs::Epsg(3857).is_geographic());
    }

    #[test]
    fn test_geographic_classification() {
        for code in [4326, 4283, 4674, 4612, 4269, 4171] {
            assert!(Crs::Epsg(code).is_geographic(), "EPSG:{}", code);
        }
        for code in [3857, 3031, 32633, 4978, 27700] {
            assert!(!Crs::Epsg(code).is_geographic(), "EPSG:{}", code);
        }

        let geodetic = r#"GEODCRS["GDA94",DATUM["Geocentric Datum of Australia 1994"],CS[ellipsoidal,2]]"#;
        assert!(Crs::parse(geodetic).unwrap().is_geographic());
        let geocentric = r#"GEODCRS["WGS 84",DATUM["World Geodetic System 1984"],CS[Cartesian,3]]"#;
        assert!(!Crs::parse(geocentric).unwrap().is_geographic());
        let projected = r#"PROJCRS["WGS 84 / UTM zone 33N",BASEGEOGCRS["WGS 84"]]"#;
        assert!(!Crs::parse(projected).unwrap().is_geographic());
    }
}
