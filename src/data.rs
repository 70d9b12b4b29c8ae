use std::collections::BTreeMap;
use std::collections::btree_map;

use rustc_hash::FxHashSet;
use serde::{Serialize, Deserialize};

pub type Item = String;
pub type SessionId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;
pub type Count = u64;

#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct ClickEvent {
    pub item: Item,
    pub time: Timestamp,
}

#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct BuyEvent {
    pub item: Item,
    pub time: Timestamp,
}

/// Interactions sharing one session identifier.
/// Clicks are kept in order of occurrence, buys in no particular order.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct Session {
    pub clicks: Vec<ClickEvent>,
    pub buys: Vec<BuyEvent>,
}

/// In-memory mapping from session identifier to its clicks and buys.
#[derive( Debug, Clone, Default )]
pub struct SessionStore {
    sessions: BTreeMap<SessionId, Session>,
}

impl ClickEvent {
    pub fn new( item: impl Into<Item>, time: Timestamp ) -> ClickEvent {
	ClickEvent { item: item.into(), time }
    }
}

impl BuyEvent {
    pub fn new( item: impl Into<Item>, time: Timestamp ) -> BuyEvent {
	BuyEvent { item: item.into(), time }
    }
}

impl Session {
    pub fn new( clicks: Vec<ClickEvent>, buys: Vec<BuyEvent> ) -> Session {
	Session { clicks, buys }
    }

    /// Items bought at any time during the session
    pub fn bought_items( &self ) -> FxHashSet<&Item> {
	self.buys.iter().map( |buy| &buy.item ).collect()
    }

    pub fn clicked_items( &self ) -> impl Iterator<Item = &Item> {
	self.clicks.iter().map( |click| &click.item )
    }

    pub fn is_buyer( &self ) -> bool {
	!self.buys.is_empty()
    }
}

impl SessionStore {
    pub fn new() -> SessionStore {
	SessionStore { sessions: BTreeMap::new() }
    }

    pub fn insert( &mut self, id: impl Into<SessionId>, session: Session ) {
	self.sessions.insert( id.into(), session );
    }

    pub fn add_click( &mut self, id: &str, click: ClickEvent ) {
	self.session_mut( id ).clicks.push( click );
    }

    pub fn add_buy( &mut self, id: &str, buy: BuyEvent ) {
	self.session_mut( id ).buys.push( buy );
    }

    pub fn get( &self, id: &str ) -> Option<&Session> {
	self.sessions.get( id )
    }

    pub fn len( &self ) -> usize {
	self.sessions.len()
    }

    pub fn is_empty( &self ) -> bool {
	self.sessions.is_empty()
    }

    pub fn iter( &self ) -> btree_map::Iter<'_, SessionId, Session> {
	self.sessions.iter()
    }

    /// Restores chronological click order after records were added out of order.
    /// The sort is stable, so clicks sharing a timestamp keep their log order.
    pub fn sort_clicks( &mut self ) {
	for session in self.sessions.values_mut() {
	    session.clicks.sort_by_key( |click| click.time );
	}
    }

    /// Number of sessions with at least one buy
    pub fn buyer_count( &self ) -> usize {
	self.sessions.values().filter( |s| s.is_buyer() ).count()
    }

    fn session_mut( &mut self, id: &str ) -> &mut Session {
	self.sessions.entry( id.to_string() ).or_default()
    }
}

impl <'a> IntoIterator for &'a SessionStore {
    type Item = (&'a SessionId, &'a Session);
    type IntoIter = btree_map::Iter<'a, SessionId, Session>;

    fn into_iter( self ) -> Self::IntoIter {
	self.sessions.iter()
    }
}

impl FromIterator<(SessionId, Session)> for SessionStore {
    fn from_iter<I: IntoIterator<Item = (SessionId, Session)>>( iter: I ) -> Self {
	SessionStore { sessions: iter.into_iter().collect() }
    }
}
