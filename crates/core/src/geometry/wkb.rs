//! (E)WKB codec
//!
//! Decodes both byte orders, the EWKB Z/M/SRID flag bits and the ISO
//! `1000`/`2000`/`3000` dimension offsets. Encoding always writes
//! little-endian EWKB and emits the SRID on the outermost geometry only.

use super::{Coord, Geometry, Path, Shape};
use crate::error::{Error, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOINT: u32 = 4;
const WKB_MULTILINESTRING: u32 = 5;
const WKB_MULTIPOLYGON: u32 = 6;
const WKB_COLLECTION: u32 = 7;
const WKB_POLYHEDRAL_SURFACE: u32 = 15;
const WKB_TIN: u32 = 16;
const WKB_TRIANGLE: u32 = 17;

/// Decode a hex string (upper or lower case) into bytes
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(Error::parse("odd-length hex string"));
    }
    fn nibble(b: u8) -> Result<u8> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(Error::parse(format!("invalid hex digit '{}'", b as char))),
        }
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

/// Encode bytes as upper-case hex
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode hex EWKB
pub fn decode_hex(hex: &str) -> Result<Geometry> {
    decode(&hex_to_bytes(hex)?)
}

/// Decode binary (E)WKB
pub fn decode(bytes: &[u8]) -> Result<Geometry> {
    let mut reader = Reader {
        cur: Cursor::new(bytes),
        len: bytes.len(),
    };
    let header = reader.header()?;
    let shape = reader.body(&header)?;
    if (reader.cur.position() as usize) != reader.len {
        return Err(Error::parse("trailing bytes after WKB geometry"));
    }
    Ok(Geometry {
        shape,
        has_z: header.has_z,
        has_m: header.has_m,
        srid: header.srid,
    })
}

struct Header {
    little_endian: bool,
    code: u32,
    has_z: bool,
    has_m: bool,
    srid: Option<i32>,
}

struct Reader<'a> {
    cur: Cursor<&'a [u8]>,
    len: usize,
}

impl Reader<'_> {
    fn remaining(&self) -> usize {
        self.len.saturating_sub(self.cur.position() as usize)
    }

    fn u32(&mut self, le: bool) -> Result<u32> {
        let v = if le {
            self.cur.read_u32::<LittleEndian>()
        } else {
            self.cur.read_u32::<BigEndian>()
        };
        v.map_err(|_| Error::parse("truncated WKB"))
    }

    fn f64(&mut self, le: bool) -> Result<f64> {
        let v = if le {
            self.cur.read_f64::<LittleEndian>()
        } else {
            self.cur.read_f64::<BigEndian>()
        };
        v.map_err(|_| Error::parse("truncated WKB"))
    }

    fn header(&mut self) -> Result<Header> {
        let little_endian = match self.cur.read_u8() {
            Ok(0) => false,
            Ok(1) => true,
            Ok(other) => return Err(Error::parse(format!("invalid WKB byte order {}", other))),
            Err(_) => return Err(Error::parse("empty WKB")),
        };
        let raw = self.u32(little_endian)?;
        let mut has_z = raw & EWKB_Z != 0;
        let mut has_m = raw & EWKB_M != 0;
        let mut code = raw & 0x0FFF_FFFF;
        match code / 1000 {
            0 => {}
            1 => has_z = true,
            2 => has_m = true,
            3 => {
                has_z = true;
                has_m = true;
            }
            _ => return Err(Error::parse(format!("invalid WKB type {}", raw))),
        }
        code %= 1000;
        let srid = if raw & EWKB_SRID != 0 {
            Some(self.u32(little_endian)? as i32)
        } else {
            None
        };
        Ok(Header {
            little_endian,
            code,
            has_z,
            has_m,
            srid,
        })
    }

    fn count(&mut self, le: bool, min_item_size: usize) -> Result<usize> {
        let n = self.u32(le)? as usize;
        if n.saturating_mul(min_item_size) > self.remaining() {
            return Err(Error::parse("WKB element count exceeds input"));
        }
        Ok(n)
    }

    fn coord(&mut self, h: &Header) -> Result<Coord> {
        let le = h.little_endian;
        let x = self.f64(le)?;
        let y = self.f64(le)?;
        let z = if h.has_z { self.f64(le)? } else { 0.0 };
        let m = if h.has_m { self.f64(le)? } else { 0.0 };
        Ok(Coord { x, y, z, m })
    }

    fn path(&mut self, h: &Header) -> Result<Path> {
        let n = self.count(h.little_endian, 16)?;
        (0..n).map(|_| self.coord(h)).collect()
    }

    fn rings(&mut self, h: &Header) -> Result<Vec<Path>> {
        let n = self.count(h.little_endian, 4)?;
        (0..n).map(|_| self.path(h)).collect()
    }

    fn part(&mut self) -> Result<Shape> {
        let h = self.header()?;
        self.body(&h)
    }

    fn body(&mut self, h: &Header) -> Result<Shape> {
        match h.code {
            WKB_POINT => {
                let c = self.coord(h)?;
                if c.x.is_nan() && c.y.is_nan() {
                    Ok(Shape::Point(None))
                } else {
                    Ok(Shape::Point(Some(c)))
                }
            }
            WKB_LINESTRING => Ok(Shape::LineString(self.path(h)?)),
            WKB_POLYGON | WKB_TRIANGLE => Ok(Shape::Polygon(self.rings(h)?)),
            WKB_MULTIPOINT => {
                let n = self.count(h.little_endian, 5)?;
                let mut points = Vec::with_capacity(n);
                for _ in 0..n {
                    match self.part()? {
                        Shape::Point(Some(c)) => points.push(c),
                        Shape::Point(None) => {}
                        other => return Err(unexpected_part("MultiPoint", &other)),
                    }
                }
                Ok(Shape::MultiPoint(points))
            }
            WKB_MULTILINESTRING => {
                let n = self.count(h.little_endian, 9)?;
                let mut lines = Vec::with_capacity(n);
                for _ in 0..n {
                    match self.part()? {
                        Shape::LineString(p) => lines.push(p),
                        other => return Err(unexpected_part("MultiLineString", &other)),
                    }
                }
                Ok(Shape::MultiLineString(lines))
            }
            WKB_MULTIPOLYGON | WKB_POLYHEDRAL_SURFACE | WKB_TIN => {
                let n = self.count(h.little_endian, 9)?;
                let mut polys = Vec::with_capacity(n);
                for _ in 0..n {
                    match self.part()? {
                        Shape::Polygon(rings) => polys.push(rings),
                        other => return Err(unexpected_part("MultiPolygon", &other)),
                    }
                }
                Ok(Shape::MultiPolygon(polys))
            }
            WKB_COLLECTION => {
                let n = self.count(h.little_endian, 9)?;
                (0..n)
                    .map(|_| self.part())
                    .collect::<Result<Vec<_>>>()
                    .map(Shape::GeometryCollection)
            }
            other => Err(Error::parse(format!("unsupported WKB geometry type {}", other))),
        }
    }
}

fn unexpected_part(container: &str, part: &Shape) -> Error {
    Error::parse(format!("{} cannot contain {}", container, part.type_name()))
}

/// Encode as binary little-endian EWKB
pub fn encode(geometry: &Geometry) -> Vec<u8> {
    let mut out = Vec::new();
    write_shape(&mut out, &geometry.shape, geometry, geometry.srid);
    out
}

/// Encode as hex EWKB
pub fn encode_hex(geometry: &Geometry) -> String {
    bytes_to_hex(&encode(geometry))
}

fn type_code(shape: &Shape) -> u32 {
    match shape {
        Shape::Point(_) => WKB_POINT,
        Shape::LineString(_) => WKB_LINESTRING,
        Shape::Polygon(_) => WKB_POLYGON,
        Shape::MultiPoint(_) => WKB_MULTIPOINT,
        Shape::MultiLineString(_) => WKB_MULTILINESTRING,
        Shape::MultiPolygon(_) => WKB_MULTIPOLYGON,
        Shape::GeometryCollection(_) => WKB_COLLECTION,
    }
}

// Writes into a Vec<u8> cannot fail, so the io results are discarded.
fn write_header(out: &mut Vec<u8>, code: u32, g: &Geometry, srid: Option<i32>) {
    let mut raw = code;
    if g.has_z {
        raw |= EWKB_Z;
    }
    if g.has_m {
        raw |= EWKB_M;
    }
    if srid.is_some() {
        raw |= EWKB_SRID;
    }
    let _ = out.write_u8(1);
    let _ = out.write_u32::<LittleEndian>(raw);
    if let Some(srid) = srid {
        let _ = out.write_u32::<LittleEndian>(srid as u32);
    }
}

fn write_coord(out: &mut Vec<u8>, c: &Coord, g: &Geometry) {
    let _ = out.write_f64::<LittleEndian>(c.x);
    let _ = out.write_f64::<LittleEndian>(c.y);
    if g.has_z {
        let _ = out.write_f64::<LittleEndian>(c.z);
    }
    if g.has_m {
        let _ = out.write_f64::<LittleEndian>(c.m);
    }
}

fn write_path(out: &mut Vec<u8>, path: &[Coord], g: &Geometry) {
    let _ = out.write_u32::<LittleEndian>(path.len() as u32);
    for c in path {
        write_coord(out, c, g);
    }
}

fn write_rings(out: &mut Vec<u8>, rings: &[Path], g: &Geometry) {
    let _ = out.write_u32::<LittleEndian>(rings.len() as u32);
    for ring in rings {
        write_path(out, ring, g);
    }
}

fn write_shape(out: &mut Vec<u8>, shape: &Shape, g: &Geometry, srid: Option<i32>) {
    write_header(out, type_code(shape), g, srid);
    match shape {
        Shape::Point(Some(c)) => write_coord(out, c, g),
        Shape::Point(None) => {
            let empty = Coord {
                x: f64::NAN,
                y: f64::NAN,
                z: f64::NAN,
                m: f64::NAN,
            };
            write_coord(out, &empty, g);
        }
        Shape::LineString(path) => write_path(out, path, g),
        Shape::Polygon(rings) => write_rings(out, rings, g),
        Shape::MultiPoint(points) => {
            let _ = out.write_u32::<LittleEndian>(points.len() as u32);
            for p in points {
                write_shape(out, &Shape::Point(Some(*p)), g, None);
            }
        }
        Shape::MultiLineString(lines) => {
            let _ = out.write_u32::<LittleEndian>(lines.len() as u32);
            for l in lines {
                write_header(out, WKB_LINESTRING, g, None);
                write_path(out, l, g);
            }
        }
        Shape::MultiPolygon(polys) => {
            let _ = out.write_u32::<LittleEndian>(polys.len() as u32);
            for p in polys {
                write_header(out, WKB_POLYGON, g, None);
                write_rings(out, p, g);
            }
        }
        Shape::GeometryCollection(parts) => {
            let _ = out.write_u32::<LittleEndian>(parts.len() as u32);
            for p in parts {
                write_shape(out, p, g, None);
            }
        }
    }
}
