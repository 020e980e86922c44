//! KML rendition of the zone collection, styled by compliance.
//!
//! Every zone becomes one `Placemark` per polygon part. Parts of the same zone
//! share a `zone_index` in their `ExtendedData`, which is how [`read_kml`]
//! groups them back into a single Polygon or MultiPolygon.

use std::io::Write;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::KmlError;
use crate::models::{ComplianceStatus, ZoneCollection, ZoneFeature, ZoneGeometry};

const KML_NS: &str = "http://www.opengis.net/kml/2.2";
const DOCUMENT_NAME: &str = "Wastewater No-Swim Zones";

/// Outline shared by every style: opaque white, 2px.
const LINE_COLOR: &str = "ffffffff";
const LINE_WIDTH: &str = "2";

/// Shared document styles, keyed by compliance.
const STYLES: [(ComplianceStatus, &str, &str); 3] = [
    (ComplianceStatus::Compliant, "compliant_style", "ffff0000"),
    (ComplianceStatus::NonCompliant, "non_compliant_style", "ff0000ff"),
    (ComplianceStatus::Unknown, "unknown_style", "ff7f7f7f"),
];

pub fn style_id(status: ComplianceStatus) -> &'static str {
    match status {
        ComplianceStatus::Compliant => "compliant_style",
        ComplianceStatus::NonCompliant => "non_compliant_style",
        ComplianceStatus::Unknown => "unknown_style",
    }
}

fn status_for_style(url: &str) -> ComplianceStatus {
    let id = url.trim().trim_start_matches('#');
    STYLES
        .iter()
        .find(|(_, style, _)| *style == id)
        .map(|(status, _, _)| *status)
        .unwrap_or(ComplianceStatus::Unknown)
}

fn compliance_label(status: ComplianceStatus) -> &'static str {
    match status {
        ComplianceStatus::Compliant => "✓ Compliant",
        ComplianceStatus::NonCompliant => "⚠️ NON-COMPLIANT",
        ComplianceStatus::Unknown => "Unknown",
    }
}

// ── Writing ─────────────────────────────────────────────────────────────

/// Render the collection as a KML document. Deterministic for a given input.
pub fn render_kml(collection: &ZoneCollection) -> Result<Vec<u8>, KmlError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("kml").with_attributes([("xmlns", KML_NS)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("Document")))?;
    text_element(&mut writer, "name", DOCUMENT_NAME)?;

    for (_, id, fill) in STYLES {
        write_style(&mut writer, id, fill)?;
    }

    for (index, feature) in collection.features.iter().enumerate() {
        write_zone(&mut writer, index, feature)?;
    }

    writer.write_event(Event::End(BytesEnd::new("Document")))?;
    writer.write_event(Event::End(BytesEnd::new("kml")))?;

    let mut bytes = writer.into_inner();
    bytes.write_all(b"\n")?;
    Ok(bytes)
}

fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<(), KmlError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_style<W: Write>(writer: &mut Writer<W>, id: &str, fill: &str) -> Result<(), KmlError> {
    writer.write_event(Event::Start(
        BytesStart::new("Style").with_attributes([("id", id)]),
    ))?;

    writer.write_event(Event::Start(BytesStart::new("LineStyle")))?;
    text_element(writer, "color", LINE_COLOR)?;
    text_element(writer, "width", LINE_WIDTH)?;
    writer.write_event(Event::End(BytesEnd::new("LineStyle")))?;

    writer.write_event(Event::Start(BytesStart::new("PolyStyle")))?;
    text_element(writer, "color", fill)?;
    text_element(writer, "fill", "1")?;
    text_element(writer, "outline", "1")?;
    writer.write_event(Event::End(BytesEnd::new("PolyStyle")))?;

    writer.write_event(Event::End(BytesEnd::new("Style")))?;
    Ok(())
}

fn write_zone<W: Write>(
    writer: &mut Writer<W>,
    index: usize,
    feature: &ZoneFeature,
) -> Result<(), KmlError> {
    let props = &feature.properties;
    let status = props.compliance_status();
    let description = describe(feature);
    let parts = feature.geometry.parts();
    let zone_index = index.to_string();
    let part_count = parts.len().to_string();

    for (part, polygon) in parts.iter().enumerate() {
        let name = if parts.len() > 1 {
            format!("{} ({}/{})", props.display_name(), part + 1, parts.len())
        } else {
            props.display_name().to_string()
        };

        writer.write_event(Event::Start(BytesStart::new("Placemark")))?;
        text_element(writer, "name", &name)?;

        writer.write_event(Event::Start(BytesStart::new("description")))?;
        writer.write_event(Event::CData(BytesCData::new(description.as_str())))?;
        writer.write_event(Event::End(BytesEnd::new("description")))?;

        text_element(writer, "styleUrl", &format!("#{}", style_id(status)))?;

        writer.write_event(Event::Start(BytesStart::new("ExtendedData")))?;
        write_data(writer, "zone_index", &zone_index)?;
        if let Some(code) = &props.code {
            write_data(writer, "code", code)?;
        }
        write_data(writer, "part", &(part + 1).to_string())?;
        write_data(writer, "parts", &part_count)?;
        writer.write_event(Event::End(BytesEnd::new("ExtendedData")))?;

        write_polygon(writer, polygon)?;
        writer.write_event(Event::End(BytesEnd::new("Placemark")))?;
    }

    Ok(())
}

fn write_data<W: Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<(), KmlError> {
    writer.write_event(Event::Start(
        BytesStart::new("Data").with_attributes([("name", name)]),
    ))?;
    text_element(writer, "value", value)?;
    writer.write_event(Event::End(BytesEnd::new("Data")))?;
    Ok(())
}

fn write_polygon<W: Write>(writer: &mut Writer<W>, polygon: &Polygon<f64>) -> Result<(), KmlError> {
    writer.write_event(Event::Start(BytesStart::new("Polygon")))?;
    write_ring(writer, "outerBoundaryIs", polygon.exterior())?;
    for hole in polygon.interiors() {
        write_ring(writer, "innerBoundaryIs", hole)?;
    }
    writer.write_event(Event::End(BytesEnd::new("Polygon")))?;
    Ok(())
}

fn write_ring<W: Write>(
    writer: &mut Writer<W>,
    boundary: &str,
    ring: &LineString<f64>,
) -> Result<(), KmlError> {
    let coordinates = ring
        .coords()
        .map(|c| format!("{},{},0", c.x, c.y))
        .collect::<Vec<_>>()
        .join(" ");

    writer.write_event(Event::Start(BytesStart::new(boundary)))?;
    writer.write_event(Event::Start(BytesStart::new("LinearRing")))?;
    text_element(writer, "coordinates", &coordinates)?;
    writer.write_event(Event::End(BytesEnd::new("LinearRing")))?;
    writer.write_event(Event::End(BytesEnd::new(boundary)))?;
    Ok(())
}

/// HTML info block shown in the placemark balloon.
fn describe(feature: &ZoneFeature) -> String {
    let props = &feature.properties;
    let mut html = format!(
        "<b>Location:</b> {}<br>",
        escape_html(props.display_name())
    );
    if let Some(code) = &props.code {
        html.push_str(&format!("<b>Code:</b> {}<br>", escape_html(code)));
    }
    if let Some(receiver) = props.receiver_name_en.as_ref().or(props.receiver_name.as_ref()) {
        html.push_str(&format!("<b>Receiver:</b> {}<br>", escape_html(receiver)));
    }
    if let Some(water) = &props.receiver_water_type {
        html.push_str(&format!("<b>Water type:</b> {}<br>", escape_html(water)));
    }
    html.push_str(&format!(
        "<b>Compliance:</b> {}",
        compliance_label(props.compliance_status())
    ));
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ── Reading ─────────────────────────────────────────────────────────────

/// A zone recovered from a KML document.
#[derive(Debug, Clone, PartialEq)]
pub struct KmlZone {
    pub name: String,
    pub code: Option<String>,
    pub compliance: ComplianceStatus,
    pub geometry: ZoneGeometry,
}

#[derive(Default)]
struct PlacemarkBuf {
    name: String,
    style_url: String,
    data: Vec<(String, String)>,
    polygons: Vec<Polygon<f64>>,
}

impl PlacemarkBuf {
    fn data(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct PolygonBuf {
    outer: Option<LineString<f64>>,
    inner: Vec<LineString<f64>>,
}

fn parse_coordinates(text: &str) -> Result<LineString<f64>, KmlError> {
    text.split_whitespace()
        .map(|tuple| {
            let mut fields = tuple.split(',');
            let x = fields.next().and_then(|v| v.parse::<f64>().ok());
            let y = fields.next().and_then(|v| v.parse::<f64>().ok());
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(KmlError::Malformed(format!("bad coordinate tuple '{}'", tuple))),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

/// Parse a KML document into zones, regrouping multi-part placemarks.
pub fn read_kml(bytes: &[u8]) -> Result<Vec<KmlZone>, KmlError> {
    let text = std::str::from_utf8(bytes).map_err(|e| KmlError::Malformed(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut placemarks: Vec<PlacemarkBuf> = Vec::new();
    let mut current: Option<PlacemarkBuf> = None;
    let mut polygon: Option<PolygonBuf> = None;
    let mut data_name: Option<String> = None;

    loop {
        let event = reader.read_event()?;
        let content = match &event {
            Event::Text(t) => Some(t.unescape()?.into_owned()),
            Event::CData(c) => Some(String::from_utf8_lossy(c).into_owned()),
            _ => None,
        };

        match event {
            Event::Start(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match local.as_str() {
                    "Placemark" => current = Some(PlacemarkBuf::default()),
                    "Polygon" => polygon = Some(PolygonBuf::default()),
                    "Data" => {
                        data_name = e
                            .try_get_attribute("name")
                            .map_err(quick_xml::Error::from)?
                            .map(|a| a.unescape_value().map(|v| v.into_owned()))
                            .transpose()?;
                    }
                    _ => {}
                }
                path.push(local);
            }
            Event::End(_) => {
                match path.pop().as_deref() {
                    Some("Placemark") => placemarks.extend(current.take()),
                    Some("Polygon") => {
                        if let (Some(buf), Some(pm)) = (polygon.take(), current.as_mut()) {
                            let outer = buf.outer.ok_or_else(|| {
                                KmlError::Malformed("Polygon without outer boundary".to_string())
                            })?;
                            pm.polygons.push(Polygon::new(outer, buf.inner));
                        }
                    }
                    Some("Data") => data_name = None,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }

        let (Some(content), Some(pm)) = (content, current.as_mut()) else {
            continue;
        };
        let parent = path.len().checked_sub(2).and_then(|i| path.get(i)).map(String::as_str);
        match (parent, path.last().map(String::as_str)) {
            (Some("Placemark"), Some("name")) => pm.name = content,
            (Some("Placemark"), Some("styleUrl")) => pm.style_url = content,
            (Some("Data"), Some("value")) => {
                if let Some(key) = &data_name {
                    pm.data.push((key.clone(), content));
                }
            }
            (Some("LinearRing"), Some("coordinates")) => {
                let ring = parse_coordinates(&content)?;
                let boundary = path.iter().rev().find(|p| p.ends_with("BoundaryIs"));
                if let Some(buf) = polygon.as_mut() {
                    match boundary.map(String::as_str) {
                        Some("outerBoundaryIs") => buf.outer = Some(ring),
                        Some("innerBoundaryIs") => buf.inner.push(ring),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    group_placemarks(placemarks)
}

fn group_placemarks(placemarks: Vec<PlacemarkBuf>) -> Result<Vec<KmlZone>, KmlError> {
    // (zone_index, first placemark, polygons) in document order.
    let mut groups: Vec<(Option<String>, PlacemarkBuf, Vec<Polygon<f64>>)> = Vec::new();

    for mut pm in placemarks {
        let polygons = std::mem::take(&mut pm.polygons);
        let index = pm.data("zone_index").map(str::to_string);
        let existing = index
            .as_ref()
            .and_then(|i| groups.iter_mut().find(|(g, _, _)| g.as_ref() == Some(i)));

        match existing {
            Some((_, _, parts)) => parts.extend(polygons),
            None => groups.push((index, pm, polygons)),
        }
    }

    groups
        .into_iter()
        .filter(|(_, _, parts)| !parts.is_empty())
        .map(|(_, first, parts)| {
            let part_count = parts.len();
            let geometry = ZoneGeometry::from_parts(MultiPolygon::new(parts))
                .ok_or_else(|| KmlError::Malformed("placemark without polygons".to_string()))?;

            let name = if part_count > 1 {
                strip_part_suffix(&first.name, part_count)
            } else {
                first.name.clone()
            };

            Ok(KmlZone {
                name,
                code: first.data("code").map(str::to_string),
                compliance: status_for_style(&first.style_url),
                geometry,
            })
        })
        .collect()
}

fn strip_part_suffix(name: &str, parts: usize) -> String {
    let suffix = format!(" (1/{})", parts);
    name.strip_suffix(&suffix).unwrap_or(name).to_string()
}
