//! Geodesic helpers: great-circle distance and geohash encoding.

/// Mean earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in meters (haversine).
pub fn great_circle_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Encodes a coordinate as a geohash of `length` characters.
///
/// Hit publications carry a deliberately short geohash so precise station
/// locations never leave the service; `length` is the configured privacy
/// cap.
pub fn geohash(lat: f64, lon: f64, length: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(length);
    let mut bits = 0_u8;
    let mut bit_count = 0_u8;
    let mut even_bit = true;

    while hash.len() < length {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                bits = (bits << 1) | 1;
                lon_range.0 = mid;
            } else {
                bits <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                bits = (bits << 1) | 1;
                lat_range.0 = mid;
            } else {
                bits <<= 1;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;
        bit_count += 1;
        if bit_count == 5 {
            hash.push(GEOHASH_ALPHABET[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_known_pairs() {
        // Munich to Berlin is roughly 504 km.
        let d = great_circle_distance_m(48.1374, 11.5755, 52.5200, 13.4050);
        assert_relative_eq!(d, 504_000.0, max_relative = 0.01);

        assert_eq!(great_circle_distance_m(10.0, 20.0, 10.0, 20.0), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = great_circle_distance_m(48.0, 11.0, 49.0, 12.0);
        let b = great_circle_distance_m(49.0, 12.0, 48.0, 11.0);
        assert_relative_eq!(a, b, max_relative = 1e-12);
    }

    #[test]
    fn test_geohash_known_values() {
        // Reference value for the Jutland peninsula example.
        assert_eq!(geohash(57.64911, 10.40744, 11), "u4pruydqqvj");
        assert_eq!(geohash(57.64911, 10.40744, 5), "u4pru");
    }

    #[test]
    fn test_geohash_length_cap() {
        assert_eq!(geohash(48.1, 11.6, 0), "");
        assert_eq!(geohash(48.1, 11.6, 3).len(), 3);
    }
}
