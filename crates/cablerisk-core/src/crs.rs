//! Coordinate reference systems and point transforms.
//! All coordinate math uses f64 for precision.
//!
//! A [`Crs`] is an EPSG code that resolves to a PROJ definition. Points move
//! between systems through a [`CoordTransform`], built once per pair and
//! reused for every point. Geographic systems take and return degrees
//! (x = lon, y = lat).

use std::fmt;
use std::str::FromStr;

use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u16,
}

impl Crs {
    /// WGS84 geographic lon/lat, the system incident records arrive in.
    pub const WGS84: Crs = Crs { epsg: 4326 };

    /// A code known to resolve; only for built-in defaults.
    pub(crate) const fn known(epsg: u16) -> Self {
        Crs { epsg }
    }

    /// Resolve an identifier such as `EPSG:32634`, `epsg:3067` or `3035`.
    pub fn from_code(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        let digits = match trimmed.split_once(':') {
            Some((auth, rest)) if auth.eq_ignore_ascii_case("epsg") => rest,
            Some(_) => return Err(Error::UnknownCrs(code.to_string())),
            None => trimmed,
        };
        let epsg: u16 = digits
            .parse()
            .map_err(|_| Error::UnknownCrs(code.to_string()))?;
        Self::from_epsg(epsg)
    }

    /// Resolve an EPSG code, checking that its definition is usable.
    pub fn from_epsg(epsg: u16) -> Result<Self> {
        let crs = Crs { epsg };
        crs.proj()?;
        Ok(crs)
    }

    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    /// PROJ definition string, if the code is known.
    pub fn definition(&self) -> Option<&'static str> {
        crs_definitions::from_code(self.epsg).map(|def| def.proj4)
    }

    fn proj(&self) -> Result<Proj> {
        let def = self
            .definition()
            .ok_or_else(|| Error::UnknownCrs(self.to_string()))?;
        Proj::from_proj_string(def).map_err(|_| Error::UnknownCrs(self.to_string()))
    }

    /// Lon/lat in degrees rather than projected linear units.
    pub fn is_geographic(&self) -> bool {
        self.definition()
            .is_some_and(|def| def.contains("+proj=longlat") || def.contains("+proj=latlong"))
    }

    /// Whether two systems share one definition, so transforming between
    /// them is the identity.
    pub fn same_projection(&self, other: &Crs) -> bool {
        self == other || matches!((self.definition(), other.definition()), (Some(a), Some(b)) if a == b)
    }

    /// Transform from this system into `target`.
    pub fn to(&self, target: Crs) -> Result<CoordTransform> {
        CoordTransform::new(*self, target)
    }

    /// Project geographic (lon, lat) degrees into this system.
    pub fn from_lonlat(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        Crs::WGS84.to(*self)?.apply(lon, lat)
    }

    /// Inverse of [`Crs::from_lonlat`]: returns (lon, lat) degrees.
    pub fn to_lonlat(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        self.to(Crs::WGS84)?.apply(x, y)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Crs::from_code(s)
    }
}

impl TryFrom<String> for Crs {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Crs::from_code(&s)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> String {
        crs.to_string()
    }
}

// ── Point transform ───────────────────────────────────────────────────────────

/// A resolved source → target transform.
pub struct CoordTransform {
    source: Crs,
    target: Crs,
    /// `None` when both systems share one definition.
    projs: Option<(Proj, Proj)>,
    source_geographic: bool,
    target_geographic: bool,
}

impl CoordTransform {
    pub fn new(source: Crs, target: Crs) -> Result<Self> {
        let projs = if source.same_projection(&target) {
            None
        } else {
            Some((source.proj()?, target.proj()?))
        };
        Ok(Self {
            source,
            target,
            projs,
            source_geographic: source.is_geographic(),
            target_geographic: target.is_geographic(),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one point. Fails when the point lies outside the domain of
    /// either projection.
    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((src, dst)) = &self.projs else {
            return Ok((x, y));
        };
        let fail = |reason: String| Error::Transform {
            from: self.source,
            to: self.target,
            x,
            y,
            reason,
        };
        let mut point = if self.source_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(src, dst, &mut point).map_err(|e| fail(e.to_string()))?;
        let (tx, ty) = if self.target_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if tx.is_finite() && ty.is_finite() {
            Ok((tx, ty))
        } else {
            Err(fail("non-finite result".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crs(code: &str) -> Crs {
        Crs::from_code(code).unwrap()
    }

    #[test]
    fn parses_codes() {
        assert_eq!(crs("EPSG:4326"), Crs::WGS84);
        assert!(Crs::WGS84.is_geographic());
        assert_eq!(crs("32634").epsg(), 32634);
        assert!(!crs("epsg:32634").is_geographic());
        assert_eq!(crs("EPSG:32735").to_string(), "EPSG:32735");
    }

    #[test]
    fn resolves_national_grids() {
        // ETRS-TM35FIN, LAEA Europe, SWEREF99 TM, Poland CS92, ETRS89 UTM 34N.
        for code in ["EPSG:3067", "EPSG:3035", "EPSG:3006", "EPSG:2180", "EPSG:25834"] {
            let c = Crs::from_code(code).unwrap_or_else(|e| panic!("{code}: {e}"));
            assert!(!c.is_geographic(), "{code}");
        }
    }

    #[test]
    fn rejects_unknown_codes() {
        for bad in ["ESRI:102001", "utm", "EPSG:1", "EPSG:999999", ""] {
            assert!(matches!(Crs::from_code(bad), Err(Error::UnknownCrs(_))), "{bad:?}");
        }
    }

    #[test]
    fn utm_central_meridian_equator_maps_to_false_easting() {
        let (e, n) = crs("EPSG:32634").from_lonlat(21.0, 0.0).unwrap();
        assert!((e - 500_000.0).abs() < 1e-3, "easting {e}");
        assert!(n.abs() < 1e-3, "northing {n}");
    }

    #[test]
    fn utm_northing_on_central_meridian_is_scaled_meridian_arc() {
        // WGS84 meridian arc from the equator to 60°N is 6 654 072.82 m.
        let (e, n) = crs("EPSG:32635").from_lonlat(27.0, 60.0).unwrap();
        assert!((e - 500_000.0).abs() < 1e-3, "easting {e}");
        assert!((n - 0.9996 * 6_654_072.82).abs() < 5.0, "northing {n}");
        // SWEREF99 TM is UTM-like about 15°E.
        let (e, _) = crs("EPSG:3006").from_lonlat(15.0, 60.0).unwrap();
        assert!((e - 500_000.0).abs() < 1e-3, "SWEREF99 easting {e}");
    }

    #[test]
    fn roundtrip_within_tolerance() {
        let mut rng_state: u64 = 42;
        let mut next = || {
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            rng_state as f64 / u64::MAX as f64
        };
        for code in ["EPSG:32634", "EPSG:25833", "EPSG:3067", "EPSG:3035", "EPSG:2180"] {
            let c = crs(code);
            let forward = Crs::WGS84.to(c).unwrap();
            let inverse = c.to(Crs::WGS84).unwrap();
            for _ in 0..200 {
                // Baltic extent.
                let lon = 14.0 + next() * 16.0;
                let lat = 53.0 + next() * 13.0;
                let (x, y) = forward.apply(lon, lat).unwrap();
                let (lon2, lat2) = inverse.apply(x, y).unwrap();
                assert!((lon - lon2).abs() < 1e-6, "{code}: lon {lon} -> {lon2}");
                assert!((lat - lat2).abs() < 1e-6, "{code}: lat {lat} -> {lat2}");
            }
        }
    }

    #[test]
    fn etrs89_and_wgs84_utm_agree() {
        let t = crs("EPSG:25834").to(crs("EPSG:32634")).unwrap();
        let (x, y) = t.apply(412_000.0, 6_500_000.0).unwrap();
        assert!((x - 412_000.0).abs() < 0.01 && (y - 6_500_000.0).abs() < 0.01, "({x}, {y})");
        assert!(crs("EPSG:32634").to(crs("EPSG:32634")).unwrap().is_identity());
    }

    #[test]
    fn serde_uses_epsg_strings() {
        let c = crs("EPSG:3067");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"EPSG:3067\"");
        let back: Crs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(serde_json::from_str::<Crs>("\"EPSG:1\"").is_err());
    }
}
