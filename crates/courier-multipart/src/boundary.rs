use rand::RngCore;

pub(crate) const CRLF: &str = "\r\n";

/// Position of a boundary marker inside the encoded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// `--boundary\r\n`, opens the first part.
    Initial,
    /// `\r\n--boundary\r\n`, separates two parts.
    Encapsulated,
    /// `\r\n--boundary--\r\n`, closes the body.
    Final,
}

/// A fresh boundary token, unique per form.
pub fn random_boundary() -> String {
    let mut rng = rand::thread_rng();
    format!("courier.boundary.{:08x}{:08x}", rng.next_u32(), rng.next_u32())
}

pub fn boundary_marker(kind: BoundaryKind, boundary: &str) -> String {
    match kind {
        BoundaryKind::Initial => format!("--{boundary}{CRLF}"),
        BoundaryKind::Encapsulated => format!("{CRLF}--{boundary}{CRLF}"),
        BoundaryKind::Final => format!("{CRLF}--{boundary}--{CRLF}"),
    }
}
