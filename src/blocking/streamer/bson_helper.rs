use bson::spec::BinarySubtype;
use bson::Binary;
use bson::Bson;
use bson::Document;
use uuid::Uuid;

/// Look up a possibly dotted `path` inside `doc`, descending subdocuments.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let value = current.get(part)?;
        if parts.peek().is_none() {
            return Some(value);
        }
        current = value.as_document()?;
    }
    None
}

/// Get the uuid carried by a BSON binary value, if it is one.
pub fn uuid_from_bson(value: &Bson) -> Option<Uuid> {
    match value {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid | BinarySubtype::UuidOld,
            ref bytes,
        }) => Uuid::from_slice(bytes).ok(),
        _ => None,
    }
}

/// Create a new bson::Binary from given `uuid`.
pub fn new_bson_binary(uuid: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: uuid.as_bytes().to_vec(),
    }
}
