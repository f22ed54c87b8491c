// Materials
//
// A shader plus the textures bound to its set-1 sampler slots. Materials
// share their shader until someone asks to edit it; from then on they own a
// private copy.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::shader::Shader;
use crate::backend::texture::Texture;
use crate::error::{self, FatalError};

#[derive(Debug, Deserialize)]
struct XmlMaterial {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    shader: XmlSource,
    #[serde(rename = "texture", default)]
    textures: Vec<XmlTexture>,
}

#[derive(Debug, Deserialize)]
struct XmlSource {
    #[serde(rename = "@src")]
    src: String,
}

#[derive(Debug, Deserialize)]
struct XmlTexture {
    #[serde(rename = "@bind")]
    bind: u32,
    #[serde(rename = "@src")]
    src: String,
}

/// `<material name=".."><shader src=".."/><texture bind="N" src=".."/></material>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialDescription {
    pub name: String,
    pub shader: PathBuf,
    pub textures: Vec<(u32, PathBuf)>,
}

impl MaterialDescription {
    pub fn load(path: &Path) -> Result<Self> {
        let xml = error::read_to_string(path)?;
        let fallback_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::parse(&xml, &path.display().to_string(), &fallback_name)?)
    }

    pub fn parse(xml: &str, origin: &str, fallback_name: &str) -> Result<Self, FatalError> {
        let parsed: XmlMaterial = quick_xml::de::from_str(xml).map_err(|e| FatalError::Parse {
            what: "material",
            path: origin.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            name: parsed.name.unwrap_or_else(|| fallback_name.to_string()),
            shader: PathBuf::from(parsed.shader.src),
            textures: parsed
                .textures
                .into_iter()
                .map(|texture| (texture.bind, PathBuf::from(texture.src)))
                .collect(),
        })
    }
}

/// Shader + texture slots. Cloning deep-copies an owned shader and shares textures.
#[derive(Clone)]
pub struct Material {
    pub name: String,
    shader: Rc<Shader>,
    editable: Option<Shader>,
    textures: Vec<Option<Rc<Texture>>>,
}

impl Material {
    pub fn new(name: impl Into<String>, shader: Rc<Shader>) -> Self {
        Self {
            name: name.into(),
            shader,
            editable: None,
            textures: Vec::new(),
        }
    }

    /// The shader draws use: the private copy once one exists
    pub fn shader(&self) -> &Shader {
        self.editable.as_ref().unwrap_or(&self.shader)
    }

    /// Private copy of the shader, made on first call
    pub fn editable_shader(&mut self) -> &mut Shader {
        let shared = &self.shader;
        self.editable.get_or_insert_with(|| Shader::clone(shared))
    }

    pub fn owns_shader(&self) -> bool {
        self.editable.is_some()
    }

    /// Replace the shared shader and drop any private copy
    pub fn set_shader(&mut self, shader: Rc<Shader>) {
        self.shader = shader;
        self.editable = None;
    }

    /// Bind `texture` to slot `slot`; lower slots nobody set stay empty
    pub fn set_texture(&mut self, slot: usize, texture: Rc<Texture>) {
        if self.textures.len() <= slot {
            self.textures.resize(slot + 1, None);
        }
        self.textures[slot] = Some(texture);
    }

    pub fn texture(&self, slot: usize) -> Option<&Rc<Texture>> {
        self.textures.get(slot)?.as_ref()
    }

    pub fn textures(&self) -> &[Option<Rc<Texture>>] {
        &self.textures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_material() {
        let xml = r#"
            <material name="crate">
              <shader src="assets/shaders/unlit.shader"/>
              <texture bind="0" src="assets/textures/crate.png"/>
              <texture bind="2" src="assets/textures/crate_normal.png"/>
            </material>
        "#;
        let description = MaterialDescription::parse(xml, "crate.material", "x").unwrap();
        assert_eq!(description.name, "crate");
        assert_eq!(description.shader, PathBuf::from("assets/shaders/unlit.shader"));
        assert_eq!(description.textures.len(), 2);
        assert_eq!(description.textures[1].0, 2);
    }

    #[test]
    fn textures_are_optional() {
        let xml = r#"<material><shader src="s.shader"/></material>"#;
        let description = MaterialDescription::parse(xml, "m.material", "m").unwrap();
        assert_eq!(description.name, "m");
        assert!(description.textures.is_empty());
    }

    #[test]
    fn missing_shader_is_a_parse_error() {
        let xml = r#"<material name="bare"><texture bind="0" src="a.png"/></material>"#;
        let err = MaterialDescription::parse(xml, "bare.material", "bare").unwrap_err();
        assert!(matches!(err, FatalError::Parse { what: "material", .. }));
    }

    #[test]
    fn texture_bind_must_be_a_number() {
        let xml = r#"<material><shader src="s.shader"/><texture bind="first" src="a.png"/></material>"#;
        assert!(MaterialDescription::parse(xml, "m.material", "m").is_err());
    }
}
