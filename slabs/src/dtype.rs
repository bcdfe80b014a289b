//! `DType`: a canonical description of an element type (§4.A).

use std::fmt;

/// The scalar kind underlying a [`DType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Signed or unsigned fixed-width integer.
    Integer {
        /// Whether the integer is signed.
        signed: bool,
    },
    /// IEEE floating point.
    Float,
    /// A custom, opaque element type with no further structure.
    Custom,
}

/// A canonical description of an element type: scalar kind, per-scalar byte
/// width, whether it is complex, and a fixed vector dimension.
///
/// Invariant: `size == per_scalar_bytes * (complex ? 2 : 1) * dimension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DType {
    kind: Kind,
    per_scalar_bytes: usize,
    complex: bool,
    dimension: usize,
    /// Index into [`ALIASES`] of the canonical entry, used to render names.
    canonical: usize,
    /// Display name for a [`DType::custom`] type; `None` for catalog types,
    /// which render through `canonical` instead.
    custom_name: Option<&'static str>,
}

/// Error raised when a [`DType`] cannot be constructed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnknownType {
    /// The alias text did not match any known type name.
    #[error("unknown type alias: {0:?}")]
    Alias(String),
    /// Markup was not of the form `"name"` or `"name, dimension"`.
    #[error("malformed type markup: {0:?}")]
    Markup(String),
}

struct Entry {
    canonical: &'static str,
    kind: Kind,
    per_scalar_bytes: usize,
    complex: bool,
    aliases: &'static [&'static str],
}

// Canonical table. Each entry's `canonical` name is itself a matchable
// alias (case-insensitively), plus whatever native/semantic/historical
// aliases the original source recognizes for it.
static ALIASES: &[Entry] = &[
    Entry { canonical: "int8", kind: Kind::Integer { signed: true }, per_scalar_bytes: 1, complex: false,
        aliases: &["int8", "char", "signed char", "int8_t", "byte"] },
    Entry { canonical: "uint8", kind: Kind::Integer { signed: false }, per_scalar_bytes: 1, complex: false,
        aliases: &["uint8", "uchar", "unsigned char", "uint8_t", "ubyte"] },
    Entry { canonical: "int16", kind: Kind::Integer { signed: true }, per_scalar_bytes: 2, complex: false,
        aliases: &["int16", "short", "int16_t"] },
    Entry { canonical: "uint16", kind: Kind::Integer { signed: false }, per_scalar_bytes: 2, complex: false,
        aliases: &["uint16", "unsigned short", "uint16_t"] },
    Entry { canonical: "int32", kind: Kind::Integer { signed: true }, per_scalar_bytes: 4, complex: false,
        aliases: &["int32", "int", "long", "int32_t"] },
    Entry { canonical: "uint32", kind: Kind::Integer { signed: false }, per_scalar_bytes: 4, complex: false,
        aliases: &["uint32", "unsigned int", "unsigned long", "uint32_t"] },
    Entry { canonical: "int64", kind: Kind::Integer { signed: true }, per_scalar_bytes: 8, complex: false,
        aliases: &["int64", "long long", "int64_t"] },
    Entry { canonical: "uint64", kind: Kind::Integer { signed: false }, per_scalar_bytes: 8, complex: false,
        aliases: &["uint64", "unsigned long long", "uint64_t"] },
    Entry { canonical: "float32", kind: Kind::Float, per_scalar_bytes: 4, complex: false,
        aliases: &["float32", "float", "single"] },
    Entry { canonical: "float64", kind: Kind::Float, per_scalar_bytes: 8, complex: false,
        aliases: &["float64", "double"] },
    Entry { canonical: "complex_int8", kind: Kind::Integer { signed: true }, per_scalar_bytes: 1, complex: true,
        aliases: &["complex_int8", "complex char"] },
    Entry { canonical: "complex_int16", kind: Kind::Integer { signed: true }, per_scalar_bytes: 2, complex: true,
        aliases: &["complex_int16", "complex short"] },
    Entry { canonical: "complex_int32", kind: Kind::Integer { signed: true }, per_scalar_bytes: 4, complex: true,
        aliases: &["complex_int32", "complex int", "complex long"] },
    Entry { canonical: "complex_int64", kind: Kind::Integer { signed: true }, per_scalar_bytes: 8, complex: true,
        aliases: &["complex_int64", "complex long long"] },
    Entry { canonical: "complex_float32", kind: Kind::Float, per_scalar_bytes: 4, complex: true,
        aliases: &["complex_float32", "complex float", "complex64"] },
    Entry { canonical: "complex_float64", kind: Kind::Float, per_scalar_bytes: 8, complex: true,
        aliases: &["complex_float64", "complex double", "complex128"] },
];

impl DType {
    /// Constructs a `DType` from a type alias (case-insensitive on the alias
    /// text) and a vector dimension (element count per sample; `1` for
    /// scalar streams).
    pub fn from_alias(alias: &str, dimension: usize) -> Result<Self, UnknownType> {
        let needle = alias.trim().to_ascii_lowercase();
        for (idx, entry) in ALIASES.iter().enumerate() {
            if entry.aliases.iter().any(|a| a.eq_ignore_ascii_case(&needle)) {
                return Ok(DType {
                    kind: entry.kind,
                    per_scalar_bytes: entry.per_scalar_bytes,
                    complex: entry.complex,
                    dimension: dimension.max(1),
                    canonical: idx,
                    custom_name: None,
                });
            }
        }
        Err(UnknownType::Alias(alias.to_string()))
    }

    /// Constructs a custom, opaque `DType` of `size_bytes` per element with
    /// the given display name. Used for types the catalog does not know
    /// (e.g. a block's private struct payload).
    pub fn custom(name: &'static str, size_bytes: usize) -> Self {
        DType {
            kind: Kind::Custom,
            per_scalar_bytes: size_bytes,
            complex: false,
            dimension: 1,
            canonical: ALIASES.len(), // out of range: rendered via custom_name instead
            custom_name: Some(name),
        }
    }

    /// Parses markup of the form `"name"` or `"name, dimension"`.
    pub fn from_markup(markup: &str) -> Result<Self, UnknownType> {
        let markup = markup.trim();
        let mut parts = markup.splitn(2, ',');
        let name = parts.next().ok_or_else(|| UnknownType::Markup(markup.to_string()))?.trim();
        let dim = match parts.next() {
            None => 1,
            Some(text) => text
                .trim()
                .parse::<usize>()
                .map_err(|_| UnknownType::Markup(markup.to_string()))?,
        };
        Self::from_alias(name, dim)
    }

    /// Total byte size of one sample (all vector lanes), per §3's invariant.
    pub fn size(&self) -> usize {
        self.per_scalar_bytes * if self.complex { 2 } else { 1 } * self.dimension
    }

    /// Byte size of a single scalar component (ignoring complex/dimension).
    pub fn scalar_size(&self) -> usize {
        self.per_scalar_bytes
    }

    /// Vector dimension (lanes per sample).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether this is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self.kind, Kind::Float)
    }

    /// Whether this is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self.kind, Kind::Integer { .. })
    }

    /// Whether this is a signed type (integers only; floats are considered signed).
    pub fn is_signed(&self) -> bool {
        match self.kind {
            Kind::Integer { signed } => signed,
            Kind::Float => true,
            Kind::Custom => false,
        }
    }

    /// Whether this is a complex (real, imag) pair per lane.
    pub fn is_complex(&self) -> bool {
        self.complex
    }

    /// Whether this is an opaque custom type outside the built-in catalog.
    pub fn is_custom(&self) -> bool {
        matches!(self.kind, Kind::Custom)
    }

    fn canonical_name(&self) -> String {
        if let Some(name) = self.custom_name {
            return name.to_string();
        }
        match ALIASES.get(self.canonical) {
            Some(entry) => entry.canonical.to_string(),
            None => format!("custom{}", self.per_scalar_bytes),
        }
    }

    /// Canonical lowercase name, e.g. `"float32"`, `"complex_int16"`.
    pub fn to_canonical(&self) -> String {
        self.canonical_name()
    }

    /// Markup form: `"name"` or `"name, dimension"` when `dimension != 1`.
    pub fn to_markup(&self) -> String {
        if self.dimension == 1 {
            self.canonical_name()
        } else {
            format!("{}, {}", self.canonical_name(), self.dimension)
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_markup())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_case_insensitive() {
        assert_eq!(DType::from_alias("FLOAT32", 1).unwrap(), DType::from_alias("float32", 1).unwrap());
        assert_eq!(DType::from_alias("Complex64", 1).unwrap().to_canonical(), "complex_float32");
    }

    #[test]
    fn unknown_alias_fails() {
        assert!(matches!(DType::from_alias("bogus", 1), Err(UnknownType::Alias(_))));
    }

    #[test]
    fn size_invariant_holds() {
        let d = DType::from_alias("complex_int16", 4).unwrap();
        assert_eq!(d.size(), 2 * 2 * 4);
    }

    #[test]
    fn markup_round_trips() {
        for alias in ["float32", "complex_int16", "int8"] {
            let d = DType::from_alias(alias, 3).unwrap();
            let markup = d.to_markup();
            let back = DType::from_markup(&markup).unwrap();
            assert_eq!(d, back);
        }
        let scalar = DType::from_alias("uint8", 1).unwrap();
        assert_eq!(scalar.to_markup(), "uint8");
    }

    #[test]
    fn custom_dtype_carries_its_given_name() {
        let d = DType::custom("iq_burst", 12);
        assert!(d.is_custom());
        assert_eq!(d.size(), 12);
        assert_eq!(d.to_canonical(), "iq_burst");
        assert_eq!(d.to_markup(), "iq_burst");
    }

    #[test]
    fn native_and_historical_aliases_resolve_to_same_type() {
        assert_eq!(DType::from_alias("long long", 1).unwrap(), DType::from_alias("int64", 1).unwrap());
        assert_eq!(DType::from_alias("byte", 1).unwrap(), DType::from_alias("int8", 1).unwrap());
    }
}
