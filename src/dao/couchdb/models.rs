use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    dto::{document::GameDocument, presence::PresenceMap, room::RoomRecord},
    state::game::MoveRecord,
};

pub const GAME_PREFIX: &str = "game::";
pub const ROOM_PREFIX: &str = "room::";
pub const PRESENCE_PREFIX: &str = "presence::";
pub const MOVE_PREFIX: &str = "move::";
pub const DESIGN_DOC_ID: &str = "_design/gridwalk";

pub fn game_doc_id(session_id: &str) -> String {
    format!("{GAME_PREFIX}{session_id}")
}

pub fn room_doc_id(room_id: &str) -> String {
    format!("{ROOM_PREFIX}{room_id}")
}

pub fn presence_doc_id(room_id: &str) -> String {
    format!("{PRESENCE_PREFIX}{room_id}")
}

pub fn move_doc_id(session_id: &str, suffix: &str) -> String {
    format!("{MOVE_PREFIX}{session_id}:{suffix}")
}

/// Path of a design-document update handler targeting `doc_id`.
pub fn update_path(handler: &str, doc_id: &str) -> String {
    format!("{DESIGN_DOC_ID}/_update/{handler}/{doc_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchGameDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub game: GameDocument,
}

impl From<(String, GameDocument, Option<String>)> for CouchGameDocument {
    fn from((session_id, game, rev): (String, GameDocument, Option<String>)) -> Self {
        Self {
            id: game_doc_id(&session_id),
            rev,
            game,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub room: RoomRecord,
}

impl From<(RoomRecord, Option<String>)> for CouchRoomDocument {
    fn from((room, rev): (RoomRecord, Option<String>)) -> Self {
        Self {
            id: room_doc_id(&room.room_id),
            rev,
            room,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouchPresenceDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub entries: PresenceMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchMoveDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub record: MoveRecord,
}

/// Body of a `_changes` response.
#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Reply body written by the update handlers below.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateReply {
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DesignDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub updates: serde_json::Map<String, Value>,
}

// Server-side handlers so single-field writes never race a client read-modify-write.
// 404 means the target document is gone, 410 means the player is no longer in the room.
const VOTE_HANDLER: &str = r#"function (doc, req) {
  if (!doc) { return [null, { code: 404, body: 'missing' }]; }
  var body = JSON.parse(req.body);
  doc.noMovesVotes = doc.noMovesVotes || {};
  doc.noMovesVotes[body.playerId] = body.vote;
  doc.version = (doc.version || 0) + 1;
  doc.updatedAt = body.at;
  return [doc, JSON.stringify({ version: doc.version })];
}"#;

const HEARTBEAT_HANDLER: &str = r#"function (doc, req) {
  if (!doc) { return [null, { code: 404, body: 'missing' }]; }
  var body = JSON.parse(req.body);
  var player = (doc.players || []).filter(function (p) { return p.id === body.playerId; })[0];
  if (!player) { return [null, { code: 410, body: 'removed' }]; }
  player.lastSeen = Math.max(player.lastSeen || 0, body.at);
  return [doc, '{}'];
}"#;

const PLAYER_FLAG_HANDLER: &str = r#"function (doc, req) {
  if (!doc) { return [null, { code: 404, body: 'missing' }]; }
  var body = JSON.parse(req.body);
  var player = (doc.players || []).filter(function (p) { return p.id === body.playerId; })[0];
  if (!player) { return [null, { code: 410, body: 'removed' }]; }
  player.isDisconnected = body.disconnected;
  if (body.disconnected) { player.disconnectedAt = body.at; } else { delete player.disconnectedAt; }
  return [doc, '{}'];
}"#;

const REMOVE_PLAYER_HANDLER: &str = r#"function (doc, req) {
  if (!doc) { return [null, { code: 404, body: 'missing' }]; }
  var body = JSON.parse(req.body);
  doc.players = (doc.players || []).filter(function (p) { return p.id !== body.playerId; });
  return [doc, '{}'];
}"#;

const ATTACH_SESSION_HANDLER: &str = r#"function (doc, req) {
  if (!doc) { return [null, { code: 404, body: 'missing' }]; }
  var body = JSON.parse(req.body);
  doc.sessionId = body.sessionId;
  doc.startedAt = body.startedAt;
  return [doc, '{}'];
}"#;

const PRESENCE_HANDLER: &str = r#"function (doc, req) {
  var body = JSON.parse(req.body);
  if (!doc) { doc = { _id: req.id, entries: {} }; }
  doc.entries = doc.entries || {};
  var current = doc.entries[body.playerId];
  if (body.remove) {
    if (!current) { return [null, '{}']; }
    delete doc.entries[body.playerId];
    return [doc, '{}'];
  }
  if (current && current.state === body.state) { return [null, '{}']; }
  doc.entries[body.playerId] = { state: body.state, last_changed: body.at };
  return [doc, '{}'];
}"#;

impl DesignDocument {
    /// The update handlers every store expects to find.
    pub fn handlers() -> Self {
        let updates = [
            ("vote", VOTE_HANDLER),
            ("heartbeat", HEARTBEAT_HANDLER),
            ("player_flag", PLAYER_FLAG_HANDLER),
            ("remove_player", REMOVE_PLAYER_HANDLER),
            ("attach_session", ATTACH_SESSION_HANDLER),
            ("presence", PRESENCE_HANDLER),
        ]
        .into_iter()
        .map(|(name, source)| (name.to_string(), Value::String(source.to_string())))
        .collect();

        Self {
            id: DESIGN_DOC_ID.to_string(),
            rev: None,
            updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::room::RoomPlayer;

    #[test]
    fn room_document_flattens_record_fields() {
        let room = RoomRecord {
            room_id: "r1".into(),
            host_id: "h".into(),
            players: vec![RoomPlayer::new("h", "Host", 5)],
            session_id: None,
            started_at: None,
            created_at: 1,
        };
        let doc = CouchRoomDocument::from((room.clone(), None));
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["_id"], "room::r1");
        assert!(value.get("_rev").is_none());
        assert_eq!(value["players"][0]["lastSeen"], 5);

        let back: CouchRoomDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back.room, room);
    }

    #[test]
    fn design_document_lists_every_handler() {
        let design = DesignDocument::handlers();
        for name in [
            "vote",
            "heartbeat",
            "player_flag",
            "remove_player",
            "attach_session",
            "presence",
        ] {
            assert!(design.updates.contains_key(name), "missing {name}");
        }
        assert_eq!(update_path("vote", "game::s"), "_design/gridwalk/_update/vote/game::s");
    }
}
