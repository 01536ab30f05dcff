// Entity Models - what one registration turns into
//
// A candidate is built in memory from one payload and is never partially
// persisted. Reference types (identifier/attribute types, locations) come
// from registries and are attached by value.

pub mod address;
pub mod candidate;
pub mod identifier;
pub mod reference;

pub use address::{Address, AddressField, AddressMapping, AddressSource};
pub use candidate::{
    search_tokens, CandidateRecord, CorrelationEntry, IdentifierRejection, PersonName,
    StoredIdentifier, StoredRecord,
};
pub use identifier::{Attribute, Identifier};
pub use reference::{AttributeType, IdentifierFormat, IdentifierType, Location, TypeRef};
