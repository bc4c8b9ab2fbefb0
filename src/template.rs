//! Pug template compiler
//!
//! Compiles the indentation-based pug syntax into pretty-printed HTML. The
//! supported subset covers what static pages use: `doctype`, tags with
//! `#id`/`.class` shorthand, attribute lists (multi-line too), inline, piped
//! and block text, block expansion (`li: a`), buffered and silent comments,
//! self-closing tags and `include`. Pug's JavaScript features (code, mixins,
//! interpolation) are not supported.
//!
//! Output uses two-space indentation with one element per line; an element
//! whose only content is a single line of text stays on one line.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use miette::NamedSource;

use crate::error::CompileError;
use crate::pipeline::SourceCompiler;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const MAX_INCLUDE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Doctype(String),
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Element {
    tag: String,
    attrs: Vec<(String, Option<String>)>,
    children: Vec<Node>,
    self_closing: bool,
}

/// What follows the tag, classes and attributes on a tag line
enum Tail {
    None,
    Text(String),
    Block,
    Expansion(String),
}

/// A non-blank source line
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
    /// Byte offset of `text` in the source
    offset: usize,
}

fn split_lines(source: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0;

    for (i, raw) in source.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let trimmed = line.trim_start_matches([' ', '\t']);
        let indent = line.len() - trimmed.len();

        if !trimmed.trim().is_empty() {
            lines.push(Line {
                number: i + 1,
                indent,
                text: trimmed.trim_end(),
                offset: offset + indent,
            });
        }
        offset += raw.len() + 1;
    }

    lines
}

struct Parser<'a> {
    name: &'a str,
    source: &'a str,
    lines: Vec<Line<'a>>,
    pos: usize,
    dir: &'a Path,
    /// Files currently being included, outermost first
    includes: Vec<PathBuf>,
}

impl<'a> Parser<'a> {
    fn new(name: &'a str, source: &'a str, dir: &'a Path, includes: Vec<PathBuf>) -> Self {
        Self {
            name,
            source,
            lines: split_lines(source),
            pos: 0,
            dir,
            includes,
        }
    }

    fn error(&self, line: Line<'_>, column: usize, message: impl Into<String>) -> CompileError {
        let column = column.min(line.text.len());
        CompileError::Template {
            message: message.into(),
            src: NamedSource::new(self.name, self.source.to_string()),
            span: (line.offset + column, line.text.len() - column).into(),
            line: line.number,
        }
    }

    fn parse_document(&mut self) -> Result<Vec<Node>, CompileError> {
        self.parse_block(None)
    }

    /// Parse sibling lines deeper than `parent`; stops at the first line that
    /// is not.
    fn parse_block(&mut self, parent: Option<usize>) -> Result<Vec<Node>, CompileError> {
        let mut nodes = Vec::new();
        let mut level = None;

        while let Some(line) = self.lines.get(self.pos).copied() {
            if parent.is_some_and(|p| line.indent <= p) {
                break;
            }
            match level {
                None => level = Some(line.indent),
                Some(l) if l != line.indent => {
                    return Err(self.error(line, 0, "inconsistent indentation"));
                }
                Some(_) => {}
            }

            self.pos += 1;
            self.parse_line(line, &mut nodes)?;
        }

        Ok(nodes)
    }

    fn has_children(&self, indent: usize) -> bool {
        self.lines.get(self.pos).is_some_and(|l| l.indent > indent)
    }

    fn reject_children(&self, line: Line<'_>, what: &str) -> Result<(), CompileError> {
        match self.lines.get(self.pos) {
            Some(child) if child.indent > line.indent => {
                Err(self.error(*child, 0, format!("{what} cannot have nested content")))
            }
            _ => Ok(()),
        }
    }

    fn skip_children(&mut self, indent: usize) {
        while self.has_children(indent) {
            self.pos += 1;
        }
    }

    /// Lines deeper than `indent`, kept verbatim relative to the first one
    fn take_raw(&mut self, indent: usize) -> Vec<String> {
        let mut raw = Vec::new();
        let mut base = None;

        while let Some(line) = self.lines.get(self.pos).copied() {
            if line.indent <= indent {
                break;
            }
            let base = *base.get_or_insert(line.indent);
            let extra = line.indent.saturating_sub(base);
            raw.push(format!("{}{}", " ".repeat(extra), line.text));
            self.pos += 1;
        }

        raw
    }

    fn parse_line(&mut self, line: Line<'a>, nodes: &mut Vec<Node>) -> Result<(), CompileError> {
        let text = line.text;

        if text.starts_with("//-") {
            self.skip_children(line.indent);
            return Ok(());
        }

        if let Some(rest) = text.strip_prefix("//") {
            let mut body = Vec::new();
            if !rest.trim().is_empty() {
                body.push(rest.trim().to_string());
            }
            body.extend(self.take_raw(line.indent));
            nodes.push(Node::Comment(body.join("\n")));
            return Ok(());
        }

        if let Some(rest) = text.strip_prefix('|') {
            self.reject_children(line, "piped text")?;
            nodes.push(Node::Text(rest.strip_prefix(' ').unwrap_or(rest).to_string()));
            return Ok(());
        }

        if text.starts_with('<') {
            self.reject_children(line, "inline HTML")?;
            nodes.push(Node::Text(text.to_string()));
            return Ok(());
        }

        if let Some(value) = keyword(text, "doctype") {
            self.reject_children(line, "doctype")?;
            let value = if value.is_empty() { "html" } else { value };
            nodes.push(Node::Doctype(value.to_string()));
            return Ok(());
        }

        if let Some(target) = keyword(text, "include") {
            self.reject_children(line, "include")?;
            nodes.extend(self.include(line, target)?);
            return Ok(());
        }

        let text = self.join_attribute_lines(line)?;
        let element = self.build_element(&text, line)?;
        nodes.push(Node::Element(element));
        Ok(())
    }

    /// Attribute lists may span lines; fold continuation lines into one
    fn join_attribute_lines(&mut self, line: Line<'a>) -> Result<String, CompileError> {
        let mut text = line.text.to_string();

        let Some(start) = attribute_start(&text) else {
            return Ok(text);
        };

        while !attributes_closed(&text[start..]) {
            match self.lines.get(self.pos) {
                Some(next) => {
                    text.push(' ');
                    text.push_str(next.text);
                    self.pos += 1;
                }
                None => return Err(self.error(line, start, "unterminated attribute list")),
            }
        }

        Ok(text)
    }

    fn build_element(&mut self, text: &str, line: Line<'a>) -> Result<Element, CompileError> {
        let (mut element, tail) = self.parse_tag(text, line)?;

        match tail {
            Tail::Expansion(rest) => {
                let child = self.build_element(rest.trim_start(), line)?;
                element.children.push(Node::Element(child));
            }
            Tail::Block => {
                let raw = self.take_raw(line.indent);
                if !raw.is_empty() {
                    element.children.push(Node::Text(raw.join("\n")));
                }
            }
            Tail::Text(inline) => {
                element.children.push(Node::Text(inline));
                element.children.extend(self.parse_block(Some(line.indent))?);
            }
            Tail::None => {
                element.children.extend(self.parse_block(Some(line.indent))?);
            }
        }

        let empty_only = element.self_closing || is_void(&element.tag);
        if empty_only && !element.children.is_empty() {
            return Err(self.error(
                line,
                0,
                format!("<{}> is self-closing and cannot have content", element.tag),
            ));
        }

        Ok(element)
    }

    fn parse_tag(&self, text: &str, line: Line<'_>) -> Result<(Element, Tail), CompileError> {
        // Column of `text` within the line (block expansion parses a suffix)
        let base = line.text.len().saturating_sub(text.len());
        let err = |at: usize, message: String| self.error(line, base + at, message);

        let name = identifier(text);
        let mut i = name.len();
        let mut element = Element {
            tag: if name.is_empty() { "div".to_string() } else { name.to_string() },
            ..Element::default()
        };

        if name.is_empty() && !text.starts_with(['.', '#']) {
            let c = text.chars().next().unwrap_or(' ');
            return Err(err(0, format!("unexpected character '{c}'")));
        }

        let mut classes: Vec<String> = Vec::new();

        let tail = loop {
            let rest = &text[i..];
            let Some(c) = rest.chars().next() else {
                break Tail::None;
            };

            match c {
                '.' => {
                    let class = identifier(&rest[1..]);
                    if class.is_empty() {
                        if rest[1..].trim().is_empty() {
                            break Tail::Block;
                        }
                        return Err(err(i, "expected a class name after '.'".to_string()));
                    }
                    classes.push(class.to_string());
                    i += 1 + class.len();
                }
                '#' => {
                    let id = identifier(&rest[1..]);
                    if id.is_empty() {
                        return Err(err(i, "expected an id after '#'".to_string()));
                    }
                    element.attrs.push(("id".to_string(), Some(id.to_string())));
                    i += 1 + id.len();
                }
                '(' => {
                    let (attrs, consumed) =
                        parse_attributes(&rest[1..]).map_err(|(at, msg)| err(i + 1 + at, msg))?;
                    for (key, value) in attrs {
                        if key == "class" {
                            classes.extend(value.iter().flat_map(|v| v.split_whitespace()).map(String::from));
                        } else {
                            element.attrs.push((key, value));
                        }
                    }
                    i += 1 + consumed;
                }
                '/' => {
                    if !rest[1..].trim().is_empty() {
                        return Err(err(i + 1, "unexpected content after '/'".to_string()));
                    }
                    element.self_closing = true;
                    break Tail::None;
                }
                ':' => {
                    if rest[1..].trim().is_empty() {
                        return Err(err(i, "expected a nested tag after ':'".to_string()));
                    }
                    break Tail::Expansion(rest[1..].to_string());
                }
                '=' | '!' => {
                    return Err(err(i, "inline code is not supported".to_string()));
                }
                ' ' | '\t' => break Tail::Text(rest[1..].to_string()),
                other => return Err(err(i, format!("unexpected character '{other}'"))),
            }
        };

        if !classes.is_empty() {
            element.attrs.insert(0, ("class".to_string(), Some(classes.join(" "))));
        }

        Ok((element, tail))
    }

    fn include(&self, line: Line<'_>, target: &str) -> Result<Vec<Node>, CompileError> {
        if target.is_empty() {
            return Err(self.error(line, 0, "include needs a path"));
        }
        if self.includes.len() >= MAX_INCLUDE_DEPTH {
            return Err(self.error(line, 0, "includes nested too deeply"));
        }

        let mut path = self.dir.join(target);
        if path.extension().is_none() {
            path.set_extension("pug");
        }

        let canonical = path.canonicalize().map_err(|_| {
            self.error(line, 8, format!("cannot find included file {}", path.display()))
        })?;

        if self.includes.contains(&canonical) {
            return Err(self.error(line, 8, format!("circular include of {target}")));
        }

        let content = std::fs::read_to_string(&canonical).map_err(|source| CompileError::Read {
            path: canonical.clone(),
            source,
        })?;

        if canonical.extension().is_some_and(|e| e == "pug") {
            let mut includes = self.includes.clone();
            includes.push(canonical.clone());

            let name = canonical.display().to_string();
            let dir = canonical.parent().unwrap_or(Path::new("."));
            Parser::new(&name, &content, dir, includes).parse_document()
        } else {
            Ok(vec![Node::Text(content.trim_end().to_string())])
        }
    }
}

/// `keyword` or `keyword rest`; `None` for anything else
fn keyword<'t>(text: &'t str, keyword: &str) -> Option<&'t str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.is_empty() {
        Some("")
    } else if rest.starts_with([' ', '\t']) {
        Some(rest.trim())
    } else {
        None
    }
}

fn identifier(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(text.len());
    &text[..end]
}

/// Byte index of the `(` opening an attribute list on a tag line
fn attribute_start(text: &str) -> Option<usize> {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '#')))
        .unwrap_or(text.len());
    text[end..].starts_with('(').then_some(end)
}

fn attributes_closed(text: &str) -> bool {
    let mut depth = 0usize;
    let mut quote = None;

    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return true;
                }
            }
            _ => {}
        }
    }

    false
}

type Attributes = Vec<(String, Option<String>)>;

/// Parse `a="x", b='y' c)` (the text after `(`); returns the attributes and
/// the number of bytes consumed including the closing `)`.
fn parse_attributes(s: &str) -> Result<(Attributes, usize), (usize, String)> {
    let mut attrs = Vec::new();
    let mut chars = s.char_indices().peekable();

    loop {
        while chars.next_if(|&(_, c)| c.is_whitespace() || c == ',').is_some() {}

        let Some((start, first)) = chars.next() else {
            return Err((0, "unterminated attribute list".to_string()));
        };
        if first == ')' {
            return Ok((attrs, start + 1));
        }
        if matches!(first, '=' | '"' | '\'') {
            return Err((start, format!("expected an attribute name, found '{first}'")));
        }

        let mut name = String::from(first);
        while let Some((_, c)) =
            chars.next_if(|&(_, c)| !(c.is_whitespace() || matches!(c, ',' | '=' | ')')))
        {
            name.push(c);
        }

        if chars.next_if(|&(_, c)| c == '=').is_none() {
            attrs.push((name, None));
            continue;
        }

        match chars.peek().copied() {
            Some((_, quote @ ('"' | '\''))) => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        Some((_, c)) if c == quote => break,
                        Some((_, c)) => value.push(c),
                        None => return Err((start, "unterminated attribute value".to_string())),
                    }
                }
                attrs.push((name, Some(value)));
            }
            _ => {
                let mut value = String::new();
                while let Some((_, c)) =
                    chars.next_if(|&(_, c)| !(c.is_whitespace() || matches!(c, ',' | ')')))
                {
                    value.push(c);
                }
                match value.as_str() {
                    "true" => attrs.push((name, None)),
                    "false" => {}
                    v if v.parse::<f64>().is_ok() => attrs.push((name, Some(value))),
                    v => {
                        return Err((start, format!("unsupported attribute value '{v}' (quote it)")));
                    }
                }
            }
        }
    }
}

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

struct Renderer {
    out: String,
    /// HTML5 doctype: `<br>` and bare boolean attributes
    terse: bool,
}

impl Renderer {
    fn render(nodes: &[Node]) -> String {
        let terse = nodes
            .iter()
            .find_map(|n| match n {
                Node::Doctype(v) => Some(v.eq_ignore_ascii_case("html")),
                _ => None,
            })
            .unwrap_or(false);

        let mut renderer = Self {
            out: String::new(),
            terse,
        };
        for node in nodes {
            renderer.node(node, 0);
        }
        renderer.out
    }

    fn node(&mut self, node: &Node, depth: usize) {
        let pad = "  ".repeat(depth);

        match node {
            Node::Doctype(value) => {
                let value = if value.eq_ignore_ascii_case("html") { "html" } else { value };
                let _ = writeln!(self.out, "{pad}<!DOCTYPE {value}>");
            }
            Node::Text(text) => {
                for line in text.lines() {
                    let _ = writeln!(self.out, "{pad}{line}");
                }
            }
            Node::Comment(text) if !text.contains('\n') => {
                let _ = writeln!(self.out, "{pad}<!-- {text} -->");
            }
            Node::Comment(text) => {
                let _ = writeln!(self.out, "{pad}<!--");
                for line in text.lines() {
                    let _ = writeln!(self.out, "{pad}  {line}");
                }
                let _ = writeln!(self.out, "{pad}-->");
            }
            Node::Element(element) => self.element(element, depth, &pad),
        }
    }

    fn element(&mut self, element: &Element, depth: usize, pad: &str) {
        let tag = &element.tag;
        let attrs = self.attributes(&element.attrs);

        if element.self_closing || is_void(tag) {
            let close = if self.terse && !element.self_closing { "" } else { "/" };
            let _ = writeln!(self.out, "{pad}<{tag}{attrs}{close}>");
            return;
        }

        match element.children.as_slice() {
            [] => {
                let _ = writeln!(self.out, "{pad}<{tag}{attrs}></{tag}>");
            }
            [Node::Text(text)] if !text.contains('\n') => {
                let _ = writeln!(self.out, "{pad}<{tag}{attrs}>{text}</{tag}>");
            }
            children => {
                let _ = writeln!(self.out, "{pad}<{tag}{attrs}>");
                for child in children {
                    self.node(child, depth + 1);
                }
                let _ = writeln!(self.out, "{pad}</{tag}>");
            }
        }
    }

    fn attributes(&self, attrs: &[(String, Option<String>)]) -> String {
        let mut out = String::new();
        for (name, value) in attrs {
            match value {
                Some(value) => {
                    let _ = write!(out, " {name}=\"{}\"", escape_attribute(value));
                }
                None if self.terse => {
                    let _ = write!(out, " {name}");
                }
                None => {
                    let _ = write!(out, " {name}=\"{name}\"");
                }
            }
        }
        out
    }
}

/// Compiles `.pug` files to pretty-printed HTML
#[derive(Debug, Clone, Default)]
pub struct TemplateCompiler;

impl TemplateCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Compile template source; `dir` anchors relative includes
    pub fn compile_str(&self, source: &str, name: &str, dir: &Path) -> Result<String, CompileError> {
        let nodes = Parser::new(name, source, dir, Vec::new()).parse_document()?;
        Ok(Renderer::render(&nodes))
    }

    /// Compile a template file
    pub fn compile_file(&self, path: &Path) -> Result<String, CompileError> {
        let source = std::fs::read_to_string(path).map_err(|source| CompileError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let name = path.display().to_string();
        let dir = path.parent().unwrap_or(Path::new("."));
        let includes = path.canonicalize().into_iter().collect();

        let nodes = Parser::new(&name, &source, dir, includes).parse_document()?;
        Ok(Renderer::render(&nodes))
    }
}

impl SourceCompiler for TemplateCompiler {
    fn source_extension(&self) -> &'static str {
        "pug"
    }

    fn output_extension(&self) -> &'static str {
        "html"
    }

    fn compile(&self, path: &Path) -> Result<String, CompileError> {
        self.compile_file(path)
    }
}
