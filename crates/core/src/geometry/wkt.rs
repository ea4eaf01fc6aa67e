//! WKT codec
//!
//! The writer produces the desktop application's dialect: CamelCase type
//! names with the dimension suffix glued on (`PointZ`, `MultiPolygonZM`), a
//! space before the opening parenthesis, `", "` between vertices and `","`
//! between parts.

use super::{Coord, Geometry, Path, Shape};
use crate::error::{Error, Result};

/// Write a geometry as WKT
pub fn write(g: &Geometry) -> String {
    let mut out = String::new();
    write_shape(&mut out, &g.shape, g);
    out
}

fn dim_suffix(g: &Geometry) -> &'static str {
    match (g.has_z, g.has_m) {
        (true, true) => "ZM",
        (true, false) => "Z",
        (false, true) => "M",
        (false, false) => "",
    }
}

fn number(v: f64) -> String {
    if v == 0.0 {
        // avoid "-0"
        "0".to_string()
    } else {
        format!("{}", v)
    }
}

fn write_coord(out: &mut String, c: &Coord, g: &Geometry) {
    out.push_str(&number(c.x));
    out.push(' ');
    out.push_str(&number(c.y));
    if g.has_z {
        out.push(' ');
        out.push_str(&number(c.z));
    }
    if g.has_m {
        out.push(' ');
        out.push_str(&number(c.m));
    }
}

fn write_path(out: &mut String, path: &[Coord], g: &Geometry) {
    out.push('(');
    for (i, c) in path.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, c, g);
    }
    out.push(')');
}

fn write_rings(out: &mut String, rings: &[Path], g: &Geometry) {
    out.push('(');
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_path(out, ring, g);
    }
    out.push(')');
}

fn write_shape(out: &mut String, shape: &Shape, g: &Geometry) {
    out.push_str(shape.type_name());
    out.push_str(dim_suffix(g));
    if shape.is_empty() {
        out.push_str(" EMPTY");
        return;
    }
    out.push(' ');
    match shape {
        Shape::Point(Some(c)) => {
            out.push('(');
            write_coord(out, c, g);
            out.push(')');
        }
        Shape::Point(None) => {}
        Shape::LineString(path) => write_path(out, path, g),
        Shape::Polygon(rings) => write_rings(out, rings, g),
        Shape::MultiPoint(points) => {
            out.push('(');
            for (i, c) in points.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('(');
                write_coord(out, c, g);
                out.push(')');
            }
            out.push(')');
        }
        Shape::MultiLineString(lines) => write_rings(out, lines, g),
        Shape::MultiPolygon(polys) => {
            out.push('(');
            for (i, p) in polys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_rings(out, p, g);
            }
            out.push(')');
        }
        Shape::GeometryCollection(parts) => {
            out.push('(');
            for (i, p) in parts.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_shape(out, p, g);
            }
            out.push(')');
        }
    }
}

/// Parse WKT (case-insensitive; `Z`/`M`/`ZM` may be glued or spaced)
pub fn read(text: &str) -> Result<Geometry> {
    let mut p = Parser {
        src: text.as_bytes(),
        pos: 0,
        has_z: false,
        has_m: false,
        dims_known: false,
    };
    let shape = p.geometry()?;
    p.skip_ws();
    if p.pos != p.src.len() {
        return Err(p.error("trailing input"));
    }
    Ok(Geometry {
        shape,
        has_z: p.has_z,
        has_m: p.has_m,
        srid: None,
    })
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    has_z: bool,
    has_m: bool,
    dims_known: bool,
}

impl Parser<'_> {
    fn error(&self, msg: &str) -> Error {
        Error::parse(format!("WKT {} at offset {}", msg, self.pos))
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn expect(&mut self, ch: u8) -> Result<()> {
        if self.peek() == Some(ch) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", ch as char)))
        }
    }

    fn word(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_alphabetic() {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).to_ascii_uppercase()
    }

    fn geometry(&mut self) -> Result<Shape> {
        let mut name = self.word();
        let mut z = false;
        let mut m = false;
        for (suffix, fz, fm) in [("ZM", true, true), ("Z", true, false), ("M", false, true)] {
            if name.len() > suffix.len() && name.ends_with(suffix) {
                let base = &name[..name.len() - suffix.len()];
                if is_type_name(base) {
                    name = base.to_string();
                    z = fz;
                    m = fm;
                    break;
                }
            }
        }
        if !z && !m {
            let save = self.pos;
            match self.word().as_str() {
                "ZM" => {
                    z = true;
                    m = true;
                }
                "Z" => z = true,
                "M" => m = true,
                _ => self.pos = save,
            }
        }
        if !self.dims_known {
            self.has_z = z;
            self.has_m = m;
            self.dims_known = true;
        }
        let save = self.pos;
        if self.word() == "EMPTY" {
            return Ok(match name.as_str() {
                "POINT" => Shape::Point(None),
                "LINESTRING" => Shape::LineString(vec![]),
                "POLYGON" => Shape::Polygon(vec![]),
                "MULTIPOINT" => Shape::MultiPoint(vec![]),
                "MULTILINESTRING" => Shape::MultiLineString(vec![]),
                "MULTIPOLYGON" => Shape::MultiPolygon(vec![]),
                "GEOMETRYCOLLECTION" => Shape::GeometryCollection(vec![]),
                _ => return Err(self.error(&format!("unknown geometry type '{}'", name))),
            });
        }
        self.pos = save;
        match name.as_str() {
            "POINT" => {
                self.expect(b'(')?;
                let c = self.coord()?;
                self.expect(b')')?;
                Ok(Shape::Point(Some(c)))
            }
            "LINESTRING" => Ok(Shape::LineString(self.path()?)),
            "POLYGON" | "TRIANGLE" => Ok(Shape::Polygon(self.rings()?)),
            "MULTIPOINT" => {
                self.expect(b'(')?;
                let mut points = Vec::new();
                loop {
                    // both "MultiPoint ((0 0),(1 1))" and "MultiPoint (0 0, 1 1)"
                    if self.peek() == Some(b'(') {
                        self.pos += 1;
                        points.push(self.coord()?);
                        self.expect(b')')?;
                    } else {
                        points.push(self.coord()?);
                    }
                    if self.peek() == Some(b',') {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                self.expect(b')')?;
                Ok(Shape::MultiPoint(points))
            }
            "MULTILINESTRING" => Ok(Shape::MultiLineString(self.rings()?)),
            "MULTIPOLYGON" | "TIN" | "POLYHEDRALSURFACE" => {
                let polys = self.list(|p| p.rings())?;
                Ok(Shape::MultiPolygon(polys))
            }
            "GEOMETRYCOLLECTION" => {
                let parts = self.list(|p| p.geometry())?;
                Ok(Shape::GeometryCollection(parts))
            }
            other => Err(self.error(&format!("unknown geometry type '{}'", other))),
        }
    }

    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        self.expect(b'(')?;
        let mut items = vec![item(self)?];
        while self.peek() == Some(b',') {
            self.pos += 1;
            items.push(item(self)?);
        }
        self.expect(b')')?;
        Ok(items)
    }

    fn rings(&mut self) -> Result<Vec<Path>> {
        self.list(|p| p.path())
    }

    fn path(&mut self) -> Result<Path> {
        self.list(|p| p.coord())
    }

    fn number(&mut self) -> Result<f64> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len()
            && matches!(self.src[self.pos], b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| self.error("expected number"))
    }

    fn coord(&mut self) -> Result<Coord> {
        let x = self.number()?;
        let y = self.number()?;
        let mut c = Coord::xy(x, y);
        if self.has_z {
            c.z = self.number()?;
        }
        if self.has_m {
            c.m = self.number()?;
        }
        Ok(c)
    }
}

fn is_type_name(name: &str) -> bool {
    matches!(
        name,
        "POINT"
            | "LINESTRING"
            | "POLYGON"
            | "TRIANGLE"
            | "MULTIPOINT"
            | "MULTILINESTRING"
            | "MULTIPOLYGON"
            | "TIN"
            | "POLYHEDRALSURFACE"
            | "GEOMETRYCOLLECTION"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(wkt: &str) {
        let g = read(wkt).unwrap();
        assert_eq!(write(&g), wkt);
    }

    #[test]
    fn test_write_dialect() {
        round_trip("Point (0 0)");
        round_trip("PointZ (0 0 0)");
        round_trip("LineString (0 0, 1 1)");
        round_trip("LineStringZ (0 0 0, 1 1 1)");
        round_trip("Polygon ((0 0, 1 0, 1 1, 0 1, 0 0))");
        round_trip("MultiPoint ((0 0),(1 1))");
        round_trip("MultiPointZ ((0 0 0),(1 1 1))");
        round_trip("MultiLineString ((0 0, 1 1),(2 2, 3 3))");
        round_trip("MultiPolygon (((0 0, 1 0, 1 1, 0 0)),((0 0, 0 1, 1 1, 0 0)))");
        round_trip("PointM (1 2 3)");
        round_trip("PointZM (1 2 3 4)");
    }

    #[test]
    fn test_read_spaced_dimension_and_case() {
        let g = read("POINT Z (1 2 3)").unwrap();
        assert!(g.has_z);
        assert_eq!(write(&g), "PointZ (1 2 3)");
        let g = read("multipoint (0 0, 1 1)").unwrap();
        assert_eq!(write(&g), "MultiPoint ((0 0),(1 1))");
    }

    #[test]
    fn test_tin_reads_as_multipolygon() {
        let g = read("TIN Z (((0 0 0, 1 0 0, 1 1 0, 0 0 0)))").unwrap();
        assert_eq!(write(&g), "MultiPolygonZ (((0 0 0, 1 0 0, 1 1 0, 0 0 0)))");
    }

    #[test]
    fn test_fractional_and_negative_numbers() {
        let g = read("Point (-71.123 78.23)").unwrap();
        assert_eq!(write(&g), "Point (-71.123 78.23)");
    }

    #[test]
    fn test_empty() {
        assert_eq!(write(&read("Point EMPTY").unwrap()), "Point EMPTY");
        assert_eq!(write(&read("GEOMETRYCOLLECTION EMPTY").unwrap()), "GeometryCollection EMPTY");
    }

    #[test]
    fn test_errors() {
        assert!(read("Point (1)").is_err());
        assert!(read("Blob (1 2)").is_err());
        assert!(read("Point (1 2) extra").is_err());
    }
}
