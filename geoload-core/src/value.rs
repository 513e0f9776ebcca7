//! Row values handed to the write router.
//!
//! Geometries travel as EWKB (little-endian WKB with an embedded SRID), the
//! representation PostGIS accepts both as a binary parameter and, hex-encoded,
//! in COPY text streams.

use std::collections::BTreeMap;

use geo::{Coord, Geometry, LineString, Point, Polygon};

/// WKB flag marking an embedded SRID.
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
/// Byte-order marker for little-endian (NDR) encoding.
const WKB_NDR: u8 = 1;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value; narrowed to the column's width when bound.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// `hstore` tags.
    Hstore(BTreeMap<String, Option<String>>),
    /// EWKB-encoded geometry.
    Geometry(Vec<u8>),
}

impl Value {
    /// Encode `geometry` as EWKB tagged with `srid`.
    ///
    /// # Examples
    ///
    /// ```
    /// use geo::{Geometry, Point};
    /// use geoload_core::Value;
    ///
    /// let value = Value::geometry(&Geometry::Point(Point::new(1.0, 2.0)), 4326);
    /// let Value::Geometry(bytes) = value else { unreachable!() };
    /// assert_eq!(bytes.len(), 1 + 4 + 4 + 16);
    /// ```
    #[must_use]
    pub fn geometry(geometry: &Geometry<f64>, srid: i32) -> Self {
        let mut out = Vec::new();
        write_geometry(&mut out, geometry, Some(srid));
        Self::Geometry(out)
    }

    /// Upper-case hex rendering of an EWKB payload, as used by COPY.
    #[must_use]
    pub fn hex(bytes: &[u8]) -> String {
        const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

        let mut out = String::with_capacity(bytes.len() * 2);
        for &byte in bytes {
            out.extend(
                [byte >> 4, byte & 0x0f]
                    .into_iter()
                    .filter_map(|nibble| DIGITS.get(usize::from(nibble)).copied().map(char::from)),
            );
        }
        out
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

fn write_header(out: &mut Vec<u8>, kind: u32, srid: Option<i32>) {
    out.push(WKB_NDR);
    match srid {
        Some(srid) => {
            out.extend_from_slice(&(kind | EWKB_SRID_FLAG).to_le_bytes());
            out.extend_from_slice(&srid.to_le_bytes());
        }
        None => out.extend_from_slice(&kind.to_le_bytes()),
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    // WKB counts are u32; larger collections cannot be represented.
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, coord: Coord<f64>) {
    out.extend_from_slice(&coord.x.to_le_bytes());
    out.extend_from_slice(&coord.y.to_le_bytes());
}

fn write_ring(out: &mut Vec<u8>, ring: &LineString<f64>) {
    write_len(out, ring.0.len());
    for coord in &ring.0 {
        write_coord(out, *coord);
    }
}

fn write_polygon_body(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    write_len(out, 1 + polygon.interiors().len());
    write_ring(out, polygon.exterior());
    for interior in polygon.interiors() {
        write_ring(out, interior);
    }
}

fn write_point_body(out: &mut Vec<u8>, point: &Point<f64>) {
    write_coord(out, point.0);
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry<f64>, srid: Option<i32>) {
    match geometry {
        Geometry::Point(point) => {
            write_header(out, 1, srid);
            write_point_body(out, point);
        }
        Geometry::LineString(line) => {
            write_header(out, 2, srid);
            write_ring(out, line);
        }
        Geometry::Line(line) => {
            write_header(out, 2, srid);
            write_len(out, 2);
            write_coord(out, line.start);
            write_coord(out, line.end);
        }
        Geometry::Polygon(polygon) => {
            write_header(out, 3, srid);
            write_polygon_body(out, polygon);
        }
        Geometry::Rect(rect) => {
            write_header(out, 3, srid);
            write_polygon_body(out, &rect.to_polygon());
        }
        Geometry::Triangle(triangle) => {
            write_header(out, 3, srid);
            write_polygon_body(out, &triangle.to_polygon());
        }
        Geometry::MultiPoint(points) => {
            write_header(out, 4, srid);
            write_len(out, points.0.len());
            for point in &points.0 {
                write_header(out, 1, None);
                write_point_body(out, point);
            }
        }
        Geometry::MultiLineString(lines) => {
            write_header(out, 5, srid);
            write_len(out, lines.0.len());
            for line in &lines.0 {
                write_header(out, 2, None);
                write_ring(out, line);
            }
        }
        Geometry::MultiPolygon(polygons) => {
            write_header(out, 6, srid);
            write_len(out, polygons.0.len());
            for polygon in &polygons.0 {
                write_header(out, 3, None);
                write_polygon_body(out, polygon);
            }
        }
        Geometry::GeometryCollection(collection) => {
            write_header(out, 7, srid);
            write_len(out, collection.0.len());
            for member in &collection.0 {
                write_geometry(out, member, None);
            }
        }
    }
}
