//! KML route markup parser
//!
//! Streams the document with a namespace-aware reader and collects one
//! coordinate per `Placemark`: the first `coordinates` element nested
//! anywhere inside it. Coordinate text is `lon,lat[,alt]`; altitude is
//! dropped and the pair is swapped into (lat, lon) order.
//!
//! A document that is not well-formed fails as a whole. Inside a well-formed
//! document, placemarks without usable coordinates are skipped.

use crate::domain::error::ParseError;
use crate::domain::types::RawRouteCoordinate;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use tracing::debug;

/// Namespace of the route exports this pipeline consumes
pub const KML_NAMESPACE: &str = "http://earth.google.com/kml/2.1";

const PLACEMARK: &[u8] = b"Placemark";
const COORDINATES: &[u8] = b"coordinates";

/// Parse route markup in the default KML 2.1 namespace
pub fn parse_route_markup(document: &str) -> Result<Vec<RawRouteCoordinate>, ParseError> {
    parse_route_markup_ns(document, KML_NAMESPACE)
}

/// Per-placemark scan state
struct OpenPlacemark {
    depth: usize,
    /// Depth of the `coordinates` element currently being read
    capture_depth: Option<usize>,
    buffer: String,
    coordinates: Option<String>,
}

impl OpenPlacemark {
    fn new(depth: usize) -> Self {
        Self { depth, capture_depth: None, buffer: String::new(), coordinates: None }
    }

    fn wants_coordinates(&self) -> bool {
        self.coordinates.is_none() && self.capture_depth.is_none()
    }
}

/// Parse route markup whose elements live in `namespace`.
///
/// Elements bound to any other namespace are ignored.
pub fn parse_route_markup_ns(
    document: &str,
    namespace: &str,
) -> Result<Vec<RawRouteCoordinate>, ParseError> {
    let mut reader = NsReader::from_str(document);
    reader.config_mut().trim_text(true);

    let target = Namespace(namespace.as_bytes());

    let mut coordinates = Vec::new();
    let mut placemark: Option<OpenPlacemark> = None;
    let mut depth = 0usize;
    let mut root_seen = false;
    let mut root_closed = false;
    let mut skipped = 0usize;

    loop {
        let (resolved, event) = match reader.read_resolved_event() {
            Ok(pair) => pair,
            Err(e) => return Err(malformed(&reader, e)),
        };

        let in_target = match resolved {
            ResolveResult::Bound(ns) => ns == target,
            ResolveResult::Unbound => false,
            ResolveResult::Unknown(prefix) => {
                let prefix = String::from_utf8_lossy(&prefix).into_owned();
                return Err(malformed(&reader, format!("unbound namespace prefix '{}'", prefix)));
            }
        };

        match event {
            Event::Start(e) => {
                if root_closed {
                    return Err(malformed(&reader, "content after document element"));
                }
                root_seen = true;
                depth += 1;

                let local = e.local_name();
                if in_target && local.as_ref() == PLACEMARK {
                    if placemark.is_none() {
                        placemark = Some(OpenPlacemark::new(depth));
                    }
                } else if in_target && local.as_ref() == COORDINATES {
                    if let Some(open) = placemark.as_mut().filter(|p| p.wants_coordinates()) {
                        open.capture_depth = Some(depth);
                        open.buffer.clear();
                    }
                }
            }
            Event::Empty(e) => {
                if root_closed {
                    return Err(malformed(&reader, "content after document element"));
                }
                if !root_seen {
                    root_seen = true;
                    root_closed = true;
                }
                // `<coordinates/>` counts as found-but-empty
                if in_target && e.local_name().as_ref() == COORDINATES {
                    if let Some(open) = placemark.as_mut().filter(|p| p.wants_coordinates()) {
                        open.coordinates = Some(String::new());
                    }
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| malformed(&reader, e))?;
                if depth == 0 {
                    return Err(malformed(&reader, "text outside document element"));
                }
                if let Some(open) = placemark.as_mut().filter(|p| p.capture_depth.is_some()) {
                    open.buffer.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(open) = placemark.as_mut().filter(|p| p.capture_depth.is_some()) {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| malformed(&reader, e))?;
                    open.buffer.push_str(text);
                }
            }
            Event::End(_) => {
                if let Some(open) = placemark.as_mut() {
                    if open.capture_depth == Some(depth) {
                        open.capture_depth = None;
                        open.coordinates = Some(std::mem::take(&mut open.buffer));
                    }
                }

                if placemark.as_ref().is_some_and(|p| p.depth == depth) {
                    if let Some(open) = placemark.take() {
                        match open.coordinates.as_deref().and_then(split_coordinate_text) {
                            Some(coordinate) => coordinates.push(coordinate),
                            None => skipped += 1,
                        }
                    }
                }

                depth = depth.saturating_sub(1);
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(ParseError::MalformedDocument("no document element".into()));
    }
    if depth != 0 {
        return Err(ParseError::MalformedDocument(format!(
            "unexpected end of document with {} unclosed element(s)",
            depth
        )));
    }

    debug!(placemarks = %coordinates.len(), skipped = %skipped, "route_markup_parsed");
    Ok(coordinates)
}

fn malformed<R>(reader: &NsReader<R>, msg: impl std::fmt::Display) -> ParseError {
    ParseError::MalformedDocument(format!("{} (at byte {})", msg, reader.buffer_position()))
}

/// `lon,lat[,alt]` to a (lat, lon) record. `None` when fewer than two components.
fn split_coordinate_text(text: &str) -> Option<RawRouteCoordinate> {
    let components: Vec<&str> = text.trim().split(',').map(str::trim).collect();
    if components.len() < 2 {
        return None;
    }

    Some(RawRouteCoordinate {
        latitude: components[1].to_string(),
        longitude: components[0].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://earth.google.com/kml/2.1">
  <Document>
    {}
  </Document>
</kml>"#,
            body
        )
    }

    #[test]
    fn test_single_placemark_swaps_to_lat_lon() {
        let doc = kml(
            "<Placemark><name>p1</name><Point><coordinates>-122.4194,37.7749,0</coordinates></Point></Placemark>",
        );
        let coords = parse_route_markup(&doc).unwrap();
        assert_eq!(
            coords,
            vec![RawRouteCoordinate { latitude: "37.7749".into(), longitude: "-122.4194".into() }]
        );
    }

    #[test]
    fn test_nested_folders_and_document_order() {
        let doc = kml(
            r#"<Folder>
                 <Placemark><Point><coordinates>1.0,2.0</coordinates></Point></Placemark>
                 <Folder>
                   <Placemark><Point><coordinates>3.0,4.0,10</coordinates></Point></Placemark>
                 </Folder>
               </Folder>
               <Placemark><Point><coordinates>5.0,6.0</coordinates></Point></Placemark>"#,
        );
        let coords = parse_route_markup(&doc).unwrap();
        let lats: Vec<&str> = coords.iter().map(|c| c.latitude.as_str()).collect();
        assert_eq!(lats, vec!["2.0", "4.0", "6.0"]);
    }

    #[test]
    fn test_placemarks_without_usable_coordinates_are_skipped() {
        let doc = kml(
            r#"<Placemark><name>no geometry</name></Placemark>
               <Placemark><Point><coordinates>42.0</coordinates></Point></Placemark>
               <Placemark><Point><coordinates/></Point></Placemark>
               <Placemark><Point><coordinates>7.5,8.5,0</coordinates></Point></Placemark>"#,
        );
        let coords = parse_route_markup(&doc).unwrap();
        assert_eq!(coords.len(), 1);
        assert_eq!(coords[0].latitude, "8.5");
        assert_eq!(coords[0].longitude, "7.5");
    }

    #[test]
    fn test_line_string_contributes_first_vertex() {
        let doc = kml(
            r#"<Placemark><LineString><coordinates>
                 10.0,20.0,0 11.0,21.0,0 12.0,22.0,0
               </coordinates></LineString></Placemark>"#,
        );
        let coords = parse_route_markup(&doc).unwrap();
        assert_eq!(coords.len(), 1);
        assert_eq!(coords[0].latitude, "20.0");
        assert_eq!(coords[0].longitude, "10.0");
    }

    #[test]
    fn test_other_namespace_is_ignored() {
        let doc = r#"<kml xmlns="http://www.opengis.net/kml/2.2">
            <Placemark><Point><coordinates>1.0,2.0</coordinates></Point></Placemark>
        </kml>"#;
        assert!(parse_route_markup(doc).unwrap().is_empty());

        let coords = parse_route_markup_ns(doc, "http://www.opengis.net/kml/2.2").unwrap();
        assert_eq!(coords.len(), 1);
    }

    #[test]
    fn test_prefixed_namespace() {
        let doc = r#"<k:kml xmlns:k="http://earth.google.com/kml/2.1">
            <k:Placemark><k:Point><k:coordinates>1.0,2.0</k:coordinates></k:Point></k:Placemark>
        </k:kml>"#;
        assert_eq!(parse_route_markup(doc).unwrap().len(), 1);
    }

    #[test]
    fn test_mismatched_tag_is_malformed() {
        let doc = kml("<Placemark><Point><coordinates>1,2</Point></coordinates></Placemark>");
        assert!(matches!(parse_route_markup(&doc), Err(ParseError::MalformedDocument(_))));
    }

    #[test]
    fn test_unclosed_document_is_malformed() {
        let doc = r#"<kml xmlns="http://earth.google.com/kml/2.1"><Placemark><Point><coordinates>1,2</coordinates>"#;
        assert!(matches!(parse_route_markup(doc), Err(ParseError::MalformedDocument(_))));
    }

    #[test]
    fn test_empty_document_is_malformed() {
        assert!(matches!(parse_route_markup(""), Err(ParseError::MalformedDocument(_))));
        assert!(matches!(
            parse_route_markup("not markup at all"),
            Err(ParseError::MalformedDocument(_))
        ));
    }
}
