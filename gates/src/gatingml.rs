use crate::error::Result as GateResult;
use crate::trees::GateTrees;
use crate::types::{
    BooleanOperand, BooleanOperator, BooleanShape, EllipsoidShape, Gate, GateDimension, GateId,
    GateShape, GatingMethod, PolygonShape, Quadrant, QuadrantDivider, QuadrantPosition,
    QuadrantShape, RectangleBound, RectangleShape,
};
use anyhow::{Context, Result, anyhow, bail};
use flow_events::{Transform, TransformParameters, TransformType};
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use tracing::debug;

/// GatingML XML namespace constants
const GATINGML_NS_V2: &str = "http://www.isac-net.org/std/Gating-ML/v2.0/gating";
const DATA_TYPE_NS_V2: &str = "http://www.isac-net.org/std/Gating-ML/v2.0/datatypes";
const TRANSFORMS_NS_V2: &str = "http://www.isac-net.org/std/Gating-ML/v2.0/transformations";
const FLOWGATE_NS: &str = "urn:flow-gating:custom-info";

const GATE_ELEMENTS: [&str; 5] = [
    "RectangleGate",
    "PolygonGate",
    "EllipsoidGate",
    "QuadrantGate",
    "BooleanGate",
];

/// A parsed XML element, reduced to local names
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart) -> Result<Self> {
        let name = String::from_utf8(start.local_name().as_ref().to_vec())
            .context("Element name is not UTF-8")?;
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.with_context(|| format!("Malformed attribute on <{name}>"))?;
            let key = String::from_utf8(attr.key.local_name().as_ref().to_vec())
                .context("Attribute name is not UTF-8")?;
            let raw = String::from_utf8(attr.value.into_owned())
                .with_context(|| format!("Attribute {key} on <{name}> is not UTF-8"))?;
            let value = quick_xml::escape::unescape(&raw)
                .with_context(|| format!("Bad escape in attribute {key} on <{name}>"))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn require_attr(&self, name: &str) -> Result<&str> {
        self.attr(name)
            .ok_or_else(|| anyhow!("<{}> is missing attribute '{name}'", self.name))
    }

    fn number_attr(&self, name: &str) -> Result<Option<f64>> {
        self.attr(name)
            .map(|value| {
                value
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("<{}> attribute '{name}' is not a number: '{value}'", self.name))
            })
            .transpose()
    }

    fn require_number_attr(&self, name: &str) -> Result<f64> {
        self.number_attr(name)?
            .ok_or_else(|| anyhow!("<{}> is missing attribute '{name}'", self.name))
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Read the whole document into an element tree
fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = vec![Element::default()];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(Element::from_start(e)?),
            Ok(Event::Empty(ref e)) => {
                let element = Element::from_start(e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    bail!("Unbalanced closing tag at byte {}", reader.buffer_position());
                }
                if let Some(element) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
            }
            Ok(Event::Text(ref t)) => {
                let text = std::str::from_utf8(t).context("Text content is not UTF-8")?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(text);
                }
            }
            Ok(Event::GeneralRef(ref r)) => {
                let name = std::str::from_utf8(r).context("Entity name is not UTF-8")?;
                let resolved = resolve_entity(name).ok_or_else(|| anyhow!("Unknown entity '&{name};'"))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push(resolved);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!(e).context(format!("XML error at byte {}", reader.buffer_position())));
            }
            _ => {}
        }
        buf.clear();
    }

    if stack.len() != 1 {
        bail!("Unexpected end of document inside <{}>", stack.last().map_or("", |e| e.name.as_str()));
    }
    let document = stack.pop().unwrap_or_default();
    document
        .children
        .into_iter()
        .find(|e| e.name == "Gating-ML")
        .context("Document has no Gating-ML root element")
}

/// A gate as read from the document, before parent links are resolved
struct GateRecord {
    id: String,
    parent_id: Option<String>,
    gate: Gate,
}

fn parse_transform(element: &Element) -> Result<Transform> {
    let id = element.require_attr("id")?;
    let body = element
        .children
        .first()
        .with_context(|| format!("Transformation '{id}' has no body"))?;
    let parameters = TransformParameters {
        t: body.require_number_attr("T")?,
        w: body.number_attr("W")?,
        m: body.number_attr("M")?,
        a: body.number_attr("A")?,
    };
    let transform_type = TransformType::from_parameters(&body.name, &parameters)
        .with_context(|| format!("Transformation '{id}'"))?;
    Ok(Transform::new(id, transform_type))
}

fn parse_dimension(element: &Element, trees: &GateTrees) -> Result<GateDimension> {
    let name = element
        .child("fcs-dimension")
        .with_context(|| format!("<{}> has no fcs-dimension", element.name))?
        .require_attr("name")?;
    let mut dimension = GateDimension::new(name);
    if let Some(reference) = element.attr("transformation-ref") {
        let transform = trees
            .find_transform(reference)
            .with_context(|| format!("Unknown transformation reference '{reference}'"))?;
        dimension = dimension.with_transform(transform);
    }
    Ok(dimension)
}

fn parse_values(element: &Element, child: &str) -> Result<Vec<f64>> {
    element
        .children_named(child)
        .map(|c| c.require_number_attr("value"))
        .collect()
}

fn parse_shape(element: &Element, dimensions: &mut Vec<GateDimension>, trees: &GateTrees) -> Result<GateShape> {
    let dimension_elements: Vec<&Element> = element.children_named("dimension").collect();
    for d in &dimension_elements {
        dimensions.push(parse_dimension(d, trees)?);
    }

    let shape = match element.name.as_str() {
        "RectangleGate" => {
            let bounds = dimension_elements
                .iter()
                .map(|d| Ok(RectangleBound::new(d.number_attr("min")?, d.number_attr("max")?)))
                .collect::<Result<Vec<_>>>()?;
            GateShape::Rectangle(RectangleShape { bounds })
        }
        "PolygonGate" => {
            let vertices = element
                .children_named("vertex")
                .map(|vertex| match parse_values(vertex, "coordinate")?.as_slice() {
                    [x, y] => Ok((*x, *y)),
                    other => bail!("Polygon vertex has {} coordinates", other.len()),
                })
                .collect::<Result<Vec<_>>>()?;
            GateShape::Polygon(PolygonShape::new(vertices)?)
        }
        "EllipsoidGate" => {
            let mean = parse_values(element.child("mean").context("Ellipsoid has no mean")?, "coordinate")?;
            let covariance = element
                .child("covarianceMatrix")
                .context("Ellipsoid has no covarianceMatrix")?
                .children_named("row")
                .map(|row| parse_values(row, "entry"))
                .collect::<Result<Vec<_>>>()?;
            let distance_square = element
                .child("distanceSquare")
                .context("Ellipsoid has no distanceSquare")?
                .require_number_attr("value")?;
            GateShape::Ellipsoid(EllipsoidShape {
                mean,
                covariance,
                distance_square,
            })
        }
        "QuadrantGate" => {
            let mut dividers = Vec::new();
            for divider in element.children_named("divider") {
                dimensions.push(parse_dimension(divider, trees)?);
                let values = divider
                    .children_named("value")
                    .map(|v| {
                        v.text
                            .trim()
                            .parse::<f64>()
                            .with_context(|| format!("Divider value is not a number: '{}'", v.text))
                    })
                    .collect::<Result<Vec<_>>>()?;
                dividers.push(QuadrantDivider {
                    id: divider.require_attr("id")?.to_string(),
                    values,
                });
            }
            let quadrants = element
                .children_named("Quadrant")
                .map(|q| {
                    Ok(Quadrant {
                        id: q.require_attr("id")?.to_string(),
                        positions: q
                            .children_named("position")
                            .map(|p| {
                                Ok(QuadrantPosition {
                                    divider: p.require_attr("divider_ref")?.to_string(),
                                    location: p.require_number_attr("location")?,
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            GateShape::Quadrant(QuadrantShape { dividers, quadrants })
        }
        "BooleanGate" => {
            let (operator, body) = [
                ("and", BooleanOperator::And),
                ("or", BooleanOperator::Or),
                ("not", BooleanOperator::Not),
            ]
            .into_iter()
            .find_map(|(name, op)| element.child(name).map(|body| (op, body)))
            .context("Boolean gate has no and/or/not operator")?;
            let operands = body
                .children_named("gateReference")
                .map(|r| {
                    Ok(BooleanOperand {
                        reference: r.require_attr("ref")?.to_string(),
                        complement: r.attr("use-as-complement") == Some("true"),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            GateShape::Boolean(BooleanShape { operator, operands })
        }
        other => bail!("Unsupported gate element <{other}>"),
    };
    Ok(shape)
}

fn parse_gate(element: &Element, trees: &GateTrees) -> Result<GateRecord> {
    let id = element.require_attr("id")?.to_string();
    let mut dimensions = Vec::new();
    let shape = parse_shape(element, &mut dimensions, trees).with_context(|| format!("Gate '{id}'"))?;
    let mut gate = Gate::new(shape, dimensions).with_original_id(id.clone());

    if let Some(custom) = element.child("custom_info") {
        if let Some(info) = custom.child("info") {
            gate.name = info.attr("name").unwrap_or_default().to_string();
            gate.description = info.attr("description").unwrap_or_default().to_string();
            gate.notes = info.attr("notes").unwrap_or_default().to_string();
            if let Some(method) = info.attr("method") {
                gate.method = method.parse::<GatingMethod>()?;
            }
        }
        gate.clustering_parameters = custom
            .children_named("clustering-parameter")
            .map(|p| parse_dimension(p, trees))
            .collect::<Result<Vec<_>>>()?;
    }

    Ok(GateRecord {
        id,
        parent_id: element.attr("parent_id").map(str::to_string),
        gate,
    })
}

/// Insert records parents-first, keeping document order among siblings
fn build_trees(mut trees: GateTrees, records: Vec<GateRecord>) -> Result<GateTrees> {
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        if by_id.insert(record.id.as_str(), index).is_some() {
            bail!("Duplicate gate id '{}'", record.id);
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut roots = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match &record.parent_id {
            Some(parent) => {
                let parent_index = *by_id
                    .get(parent.as_str())
                    .with_context(|| format!("Gate '{}' references unknown parent '{parent}'", record.id))?;
                children[parent_index].push(index);
            }
            None => roots.push(index),
        }
    }

    let mut slots: Vec<Option<GateRecord>> = records.into_iter().map(Some).collect();
    let mut stack: Vec<(usize, Option<GateId>)> = roots.into_iter().rev().map(|r| (r, None)).collect();
    let mut inserted = 0;
    while let Some((index, parent)) = stack.pop() {
        let record = slots[index]
            .take()
            .with_context(|| format!("Gate #{index} reached twice"))?;
        let label = record.id.clone();
        let id = match parent {
            Some(parent) => trees.add_child_gate(parent, record.gate),
            None => trees.add_root_gate(record.gate),
        }
        .map_err(|e| anyhow!(e).context(format!("Gate '{label}'")))?;
        inserted += 1;
        stack.extend(children[index].iter().rev().map(|&c| (c, Some(id))));
    }

    if inserted != slots.len() {
        let stuck: Vec<&str> = slots.iter().flatten().map(|r| r.id.as_str()).collect();
        bail!("Gates form a parent cycle: {}", stuck.join(", "));
    }
    Ok(trees)
}

fn gatingml_to_trees(xml: &str) -> Result<GateTrees> {
    let root = parse_document(xml)?;
    let mut trees = GateTrees::new();

    let mut transform_ids = HashSet::new();
    for element in root.children_named("transformation") {
        let transform = parse_transform(element)?;
        if !transform_ids.insert(transform.id.clone()) {
            bail!("Duplicate transformation id '{}'", transform.id);
        }
        trees.add_transform(transform);
    }

    let records = root
        .children
        .iter()
        .filter(|e| GATE_ELEMENTS.contains(&e.name.as_str()))
        .map(|e| parse_gate(e, &trees))
        .collect::<Result<Vec<_>>>()?;
    let trees = build_trees(trees, records)?;
    debug!("Read {} gates from Gating-ML", trees.number_of_gates());
    Ok(trees)
}

/// Parse Gating-ML 2.0 XML into gate trees.
///
/// Gates may list their `parent_id` before or after the parent itself; links are
/// resolved once the whole document is read. Transformations must be declared in the
/// document before gates reference them.
///
/// # Errors
/// Returns an error for malformed XML, unknown gate or transformation references,
/// unknown gating methods, invalid transforms, or gates that break their structural rules
pub fn gatingml_to_gate_trees(xml: &str) -> GateResult<GateTrees> {
    gatingml_to_trees(xml).map_err(|err| {
        // surface the typed error when the failure came from the gate model itself
        match err.downcast::<crate::GateError>() {
            Ok(gate_error) => gate_error,
            Err(other) => other.into(),
        }
    })
}

fn number(value: f64) -> String {
    value.to_string()
}

fn write_empty<W: Write>(writer: &mut Writer<W>, element: BytesStart) -> Result<()> {
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

fn write_fcs_dimension<W: Write>(writer: &mut Writer<W>, parameter: &str) -> Result<()> {
    let mut fcs = BytesStart::new("data-type:fcs-dimension");
    fcs.push_attribute(("data-type:name", parameter));
    write_empty(writer, fcs)
}

fn write_dimension<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    prefix: &str,
    dimension: &GateDimension,
    bound: Option<&RectangleBound>,
    trees: &GateTrees,
) -> Result<()> {
    let mut start = BytesStart::new(tag);
    if let Some(bound) = bound {
        if let Some(min) = bound.min {
            start.push_attribute(("gating:min", number(min).as_str()));
        }
        if let Some(max) = bound.max {
            start.push_attribute(("gating:max", number(max).as_str()));
        }
    }
    if let Some(transform) = dimension.transform.and_then(|t| trees.transform(t)) {
        start.push_attribute((format!("{prefix}:transformation-ref").as_str(), transform.id.as_ref()));
    }
    writer.write_event(Event::Start(start))?;
    write_fcs_dimension(writer, &dimension.parameter)?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_value_list<W: Write>(writer: &mut Writer<W>, tag: &str, child: &str, values: &[f64]) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    for value in values {
        let mut element = BytesStart::new(child);
        element.push_attribute(("data-type:value", number(*value).as_str()));
        write_empty(writer, element)?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_transform<W: Write>(writer: &mut Writer<W>, transform: &Transform) -> Result<()> {
    let mut start = BytesStart::new("transforms:transformation");
    start.push_attribute(("transforms:id", transform.id.as_ref()));
    writer.write_event(Event::Start(start))?;

    let parameters = transform.transform_type.parameters();
    let mut body = BytesStart::new(format!("transforms:{}", transform.transform_type.keyword()));
    body.push_attribute(("transforms:T", number(parameters.t).as_str()));
    for (name, value) in [("transforms:W", parameters.w), ("transforms:M", parameters.m), ("transforms:A", parameters.a)] {
        if let Some(value) = value {
            body.push_attribute((name, number(value).as_str()));
        }
    }
    write_empty(writer, body)?;
    writer.write_event(Event::End(BytesEnd::new("transforms:transformation")))?;
    Ok(())
}

fn write_custom_info<W: Write>(writer: &mut Writer<W>, gate: &Gate, trees: &GateTrees) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("data-type:custom_info")))?;
    let mut info = BytesStart::new("flowgate:info");
    info.push_attribute(("flowgate:name", gate.name.as_str()));
    info.push_attribute(("flowgate:description", gate.description.as_str()));
    info.push_attribute(("flowgate:notes", gate.notes.as_str()));
    info.push_attribute(("flowgate:method", gate.method.to_string().as_str()));
    write_empty(writer, info)?;
    for parameter in &gate.clustering_parameters {
        write_dimension(writer, "flowgate:clustering-parameter", "flowgate", parameter, None, trees)?;
    }
    writer.write_event(Event::End(BytesEnd::new("data-type:custom_info")))?;
    Ok(())
}

fn write_gate<W: Write>(
    writer: &mut Writer<W>,
    trees: &GateTrees,
    id: GateId,
    xml_ids: &HashMap<GateId, String>,
) -> Result<()> {
    let gate = trees.require_gate(id)?;
    let tag = match &gate.shape {
        GateShape::Rectangle(_) => "gating:RectangleGate",
        GateShape::Polygon(_) => "gating:PolygonGate",
        GateShape::Ellipsoid(_) => "gating:EllipsoidGate",
        GateShape::Quadrant(_) => "gating:QuadrantGate",
        GateShape::Boolean(_) => "gating:BooleanGate",
    };
    let mut start = BytesStart::new(tag);
    start.push_attribute(("gating:id", xml_ids[&id].as_str()));
    if let Some(parent) = trees.parent(id) {
        start.push_attribute(("gating:parent_id", xml_ids[&parent].as_str()));
    }
    writer.write_event(Event::Start(start))?;
    write_custom_info(writer, gate, trees)?;

    match &gate.shape {
        GateShape::Rectangle(rect) => {
            for (dimension, bound) in gate.dimensions.iter().zip(&rect.bounds) {
                write_dimension(writer, "gating:dimension", "gating", dimension, Some(bound), trees)?;
            }
        }
        GateShape::Polygon(polygon) => {
            for dimension in &gate.dimensions {
                write_dimension(writer, "gating:dimension", "gating", dimension, None, trees)?;
            }
            for &(x, y) in polygon.vertices() {
                write_value_list(writer, "gating:vertex", "gating:coordinate", &[x, y])?;
            }
        }
        GateShape::Ellipsoid(ellipsoid) => {
            for dimension in &gate.dimensions {
                write_dimension(writer, "gating:dimension", "gating", dimension, None, trees)?;
            }
            write_value_list(writer, "gating:mean", "gating:coordinate", &ellipsoid.mean)?;
            writer.write_event(Event::Start(BytesStart::new("gating:covarianceMatrix")))?;
            for row in &ellipsoid.covariance {
                write_value_list(writer, "gating:row", "gating:entry", row)?;
            }
            writer.write_event(Event::End(BytesEnd::new("gating:covarianceMatrix")))?;
            let mut distance = BytesStart::new("gating:distanceSquare");
            distance.push_attribute(("data-type:value", number(ellipsoid.distance_square).as_str()));
            write_empty(writer, distance)?;
        }
        GateShape::Quadrant(quadrant) => {
            for (dimension, divider) in gate.dimensions.iter().zip(&quadrant.dividers) {
                let mut start = BytesStart::new("gating:divider");
                start.push_attribute(("gating:id", divider.id.as_str()));
                if let Some(transform) = dimension.transform.and_then(|t| trees.transform(t)) {
                    start.push_attribute(("gating:transformation-ref", transform.id.as_ref()));
                }
                writer.write_event(Event::Start(start))?;
                write_fcs_dimension(writer, &dimension.parameter)?;
                for value in &divider.values {
                    writer.write_event(Event::Start(BytesStart::new("gating:value")))?;
                    writer.write_event(Event::Text(BytesText::new(&number(*value))))?;
                    writer.write_event(Event::End(BytesEnd::new("gating:value")))?;
                }
                writer.write_event(Event::End(BytesEnd::new("gating:divider")))?;
            }
            for q in &quadrant.quadrants {
                let mut start = BytesStart::new("gating:Quadrant");
                start.push_attribute(("gating:id", q.id.as_str()));
                writer.write_event(Event::Start(start))?;
                for position in &q.positions {
                    let mut element = BytesStart::new("gating:position");
                    element.push_attribute(("gating:divider_ref", position.divider.as_str()));
                    element.push_attribute(("gating:location", number(position.location).as_str()));
                    write_empty(writer, element)?;
                }
                writer.write_event(Event::End(BytesEnd::new("gating:Quadrant")))?;
            }
        }
        GateShape::Boolean(boolean) => {
            let operator = format!("gating:{}", boolean.operator);
            writer.write_event(Event::Start(BytesStart::new(operator.as_str())))?;
            for operand in &boolean.operands {
                let mut element = BytesStart::new("gating:gateReference");
                element.push_attribute(("gating:ref", operand.reference.as_str()));
                if operand.complement {
                    element.push_attribute(("gating:use-as-complement", "true"));
                }
                write_empty(writer, element)?;
            }
            writer.write_event(Event::End(BytesEnd::new(operator.as_str())))?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Gating-ML ids: the original id when present, otherwise a generated unique one
fn assign_xml_ids(trees: &GateTrees) -> HashMap<GateId, String> {
    let mut used: HashSet<String> = trees
        .iter()
        .filter_map(|(_, g)| g.original_id.clone())
        .collect();
    trees
        .iter()
        .map(|(id, gate)| {
            let xml_id = match &gate.original_id {
                Some(original) => original.clone(),
                None => {
                    let mut candidate = format!("Gate_{}", id.index());
                    while used.contains(&candidate) {
                        candidate.push('_');
                    }
                    used.insert(candidate.clone());
                    candidate
                }
            };
            (id, xml_id)
        })
        .collect()
}

fn trees_to_gatingml(trees: &GateTrees) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("gating:Gating-ML");
    root.push_attribute(("xmlns:gating", GATINGML_NS_V2));
    root.push_attribute(("xmlns:data-type", DATA_TYPE_NS_V2));
    root.push_attribute(("xmlns:transforms", TRANSFORMS_NS_V2));
    root.push_attribute(("xmlns:flowgate", FLOWGATE_NS));
    writer.write_event(Event::Start(root))?;

    for transform in trees.transforms() {
        write_transform(&mut writer, transform)?;
    }
    let xml_ids = assign_xml_ids(trees);
    for id in trees.find_descendant_gates() {
        write_gate(&mut writer, trees, id, &xml_ids)?;
    }

    writer.write_event(Event::End(BytesEnd::new("gating:Gating-ML")))?;
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("Failed to convert XML bytes to string")
}

/// Write gate trees as Gating-ML 2.0 XML.
///
/// Gates are written flat in parent-before-child order, linked by `gating:parent_id`.
/// Names, notes, the gating method, and clustering parameters go into
/// `data-type:custom_info`.
///
/// # Errors
/// Returns an error if writing the XML fails
pub fn gate_trees_to_gatingml(trees: &GateTrees) -> GateResult<String> {
    Ok(trees_to_gatingml(trees)?)
}
