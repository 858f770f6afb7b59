//! Distinguished names and naming hierarchies
//!
//! A [`DistinguishedName`] keeps its RDNs in RFC 4514 string order (most
//! specific first, root anchor last). Hierarchies project a name onto one
//! naming axis; the projection and the suffix distance between two
//! projections decide whether one subject may issue for another.

use std::fmt;

use x509_parser::x509::X509Name;

use crate::error::{DpkiError, Result};

/// Ordered attribute-type lists used to project a DN onto a naming axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// Geographic axis: C, ST, L, STREET, CN
    Country,
    /// DNS-style axis: DC, UID
    Domain,
    /// Organizational axis: O, OU, CN
    Organization,
}

impl Hierarchy {
    /// All hierarchies, in the order `can_issue` consults them
    pub const ALL: [Hierarchy; 3] = [Hierarchy::Country, Hierarchy::Organization, Hierarchy::Domain];

    /// Attribute types, root anchor first, head last
    pub fn order(&self) -> &'static [&'static str] {
        match self {
            Hierarchy::Country => &["C", "ST", "L", "STREET", "CN"],
            Hierarchy::Domain => &["DC", "UID"],
            Hierarchy::Organization => &["O", "OU", "CN"],
        }
    }

    /// The root anchor type: the last remaining RDN must carry it
    fn root(&self) -> &'static str {
        self.order()[0]
    }

    /// The head type, dropped by base projections
    fn head(&self) -> &'static str {
        self.order()[self.order().len() - 1]
    }
}

/// One relative distinguished name: a non-empty ordered set of
/// `(attribute type, value)` atoms joined by `+` in string form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    atoms: Vec<(String, String)>,
}

impl Rdn {
    /// The atoms in insertion order
    pub fn atoms(&self) -> &[(String, String)] {
        &self.atoms
    }

    fn first_type(&self) -> &str {
        &self.atoms[0].0
    }

    /// Value of the first atom
    pub fn first_value(&self) -> &str {
        &self.atoms[0].1
    }
}

/// An ordered sequence of RDNs in RFC 4514 order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
}

/// Split on `ch`, honoring backslash escapes
fn split_unescaped(src: &str, ch: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut escaped = false;
    for c in src.chars() {
        if escaped {
            parts.last_mut().unwrap().push(c);
            escaped = false;
        } else if c == '\\' {
            parts.last_mut().unwrap().push(c);
            escaped = true;
        } else if c == ch {
            parts.push(String::new());
        } else {
            parts.last_mut().unwrap().push(c);
        }
    }
    parts
}

impl DistinguishedName {
    /// Parse an RFC 4514 string
    ///
    /// RDNs split on unescaped `,`, atoms on unescaped `+`; attribute types
    /// are upper-cased; whitespace around tokens is stripped.
    pub fn parse(src: &str) -> Result<Self> {
        let mut rdns = Vec::new();
        for rdn_src in split_unescaped(src, ',') {
            let mut atoms = Vec::new();
            for atom_src in split_unescaped(rdn_src.trim(), '+') {
                let (key, value) = atom_src
                    .trim()
                    .split_once('=')
                    .ok_or_else(|| DpkiError::WrongName(src.to_string()))?;
                let key = key.trim().to_uppercase();
                let value = value.trim().to_string();
                if key.is_empty() {
                    return Err(DpkiError::WrongName(src.to_string()));
                }
                atoms.push((key, value));
            }
            if atoms.is_empty() {
                return Err(DpkiError::WrongName(src.to_string()));
            }
            rdns.push(Rdn { atoms });
        }
        if rdns.is_empty() {
            return Err(DpkiError::WrongName(src.to_string()));
        }
        Ok(Self { rdns })
    }

    /// Build from a parsed X.509 name
    ///
    /// `x509-parser` yields RDNs in DER order; RFC 4514 strings list them in
    /// reverse, so the sequence is flipped here. Multi-valued RDNs are kept
    /// intact. Attribute types outside the known set keep their dotted OID.
    pub fn from_x509_name(name: &X509Name<'_>) -> Result<Self> {
        let mut rdns = Vec::new();
        for rdn in name.iter_rdn() {
            let mut atoms = Vec::new();
            for attr in rdn.iter() {
                let key = match attr.attr_type().to_id_string().as_str() {
                    "2.5.4.3" => "CN".to_string(),
                    "2.5.4.6" => "C".to_string(),
                    "2.5.4.7" => "L".to_string(),
                    "2.5.4.8" => "ST".to_string(),
                    "2.5.4.9" => "STREET".to_string(),
                    "2.5.4.10" => "O".to_string(),
                    "2.5.4.11" => "OU".to_string(),
                    "0.9.2342.19200300.100.1.25" => "DC".to_string(),
                    "0.9.2342.19200300.100.1.1" => "UID".to_string(),
                    other => other.to_string(),
                };
                let value = attr
                    .as_str()
                    .map_err(|err| DpkiError::X509(err.to_string()))?
                    .to_string();
                atoms.push((key, value));
            }
            if !atoms.is_empty() {
                rdns.push(Rdn { atoms });
            }
        }
        if rdns.is_empty() {
            return Err(DpkiError::WrongName(name.to_string()));
        }
        rdns.reverse();
        Ok(Self { rdns })
    }

    /// The RDNs in RFC 4514 order
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Project onto a hierarchy
    ///
    /// Keeps only atoms whose type belongs to the hierarchy, drops RDNs left
    /// empty, and optionally (`base`) drops a leading head RDN. The result
    /// exists only when it stays anchored at the hierarchy root.
    pub fn extract(&self, hierarchy: Hierarchy, base: bool) -> Option<DistinguishedName> {
        let order = hierarchy.order();
        let mut rdns: Vec<Rdn> = self
            .rdns
            .iter()
            .map(|rdn| Rdn {
                atoms: rdn
                    .atoms
                    .iter()
                    .filter(|(key, _)| order.contains(&key.as_str()))
                    .cloned()
                    .collect(),
            })
            .filter(|rdn| !rdn.atoms.is_empty())
            .collect();
        if base && rdns.first().map(Rdn::first_type) == Some(hierarchy.head()) {
            rdns.remove(0);
        }
        if rdns.last().map(Rdn::first_type) == Some(hierarchy.root()) {
            Some(DistinguishedName { rdns })
        } else {
            None
        }
    }

    /// Hops from this name down to `other` along one hierarchy
    ///
    /// This side projects with `base = true` (its head RDN names the entity,
    /// not a namespace level); `other` projects plainly. Non-zero only when
    /// this projection is a proper root-anchored suffix of the other's.
    pub fn distance(&self, hierarchy: Hierarchy, other: &DistinguishedName) -> usize {
        let Some(own) = self.extract(hierarchy, true) else {
            return 0;
        };
        let Some(theirs) = other.extract(hierarchy, false) else {
            return 0;
        };
        if theirs.rdns.len() > own.rdns.len() && theirs.rdns.ends_with(&own.rdns) {
            theirs.rdns.len() - own.rdns.len()
        } else {
            0
        }
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first_rdn = true;
        for rdn in &self.rdns {
            if !first_rdn {
                f.write_str(",")?;
            }
            first_rdn = false;
            let mut first_atom = true;
            for (key, value) in &rdn.atoms {
                if !first_atom {
                    f.write_str("+")?;
                }
                first_atom = false;
                write!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for DistinguishedName {
    type Err = DpkiError;

    fn from_str(src: &str) -> Result<Self> {
        Self::parse(src)
    }
}

/// Number of hops from an issuer subject down to a CSR subject
///
/// The maximum distance over all hierarchies; 0 means the issuer cannot
/// issue for the subject.
pub fn can_issue(issuer: &DistinguishedName, subject: &DistinguishedName) -> usize {
    Hierarchy::ALL
        .iter()
        .map(|hierarchy| issuer.distance(*hierarchy, subject))
        .max()
        .unwrap_or(0)
}
