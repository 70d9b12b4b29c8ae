use std::path::Path;
use std::fs::File;
use std::io::{BufReader, BufRead, BufWriter, Write};

use chrono::DateTime;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, debug};

use crate::*;
use crate::trainer::Predictions;

/// Reads a click log and, if given, a buy log into a store with chronologically ordered clicks
pub fn read_sessions( clicks_path: &str, buys_path: Option<&str> ) -> Result<SessionStore> {
    let mut store = SessionStore::new();
    let clicks = read_clicks( open( clicks_path )?, &mut store )?;
    info!( "Read {clicks} clicks from {clicks_path}" );
    if let Some( buys_path ) = buys_path {
	let buys = read_buys( open( buys_path )?, &mut store )?;
	info!( "Read {buys} buys from {buys_path}" );
    }
    store.sort_clicks();
    info!( "{} sessions, {} with buys", store.len(), store.buyer_count() );
    Ok( store )
}

/// Reads only a buy log, e.g. the true purchases of an evaluation set
pub fn read_buy_log( buys_path: &str ) -> Result<SessionStore> {
    let mut store = SessionStore::new();
    let buys = read_buys( open( buys_path )?, &mut store )?;
    info!( "Read {buys} buys of {} sessions from {buys_path}", store.len() );
    Ok( store )
}

/// Adds every click of the log to the store and returns the number of clicks
pub fn read_clicks<R: BufRead>( reader: R, store: &mut SessionStore ) -> Result<usize> {
    read_events( reader, |session, item, time| store.add_click( session, ClickEvent { item, time } ))
}

/// Adds every buy of the log to the store and returns the number of buys
pub fn read_buys<R: BufRead>( reader: R, store: &mut SessionStore ) -> Result<usize> {
    read_events( reader, |session, item, time| store.add_buy( session, BuyEvent { item, time } ))
}

fn read_events<R, F>( reader: R, mut consume: F ) -> Result<usize> where
    R: BufRead,
    F: FnMut( &str, Item, Timestamp ),
{
    let mut count = 0;
    for (index, line) in reader.lines().enumerate() {
	let line = line?;
	if line.trim().is_empty() {
	    continue;
	}
	let (session, item, time) = parse_event_line( &line, index + 1 )?;
	consume( session, item, time );
	count += 1;
    }
    Ok( count )
}

/// Splits `session,timestamp,item[,...]` into its fields. Further columns are ignored.
pub fn parse_event_line( line: &str, line_number: usize ) -> Result<(&str, Item, Timestamp)> {
    let mut fields = line.trim_end().split( ',' ).map( str::trim );
    let session = required_field( &mut fields, "session id", line_number )?;
    let time = required_field( &mut fields, "timestamp", line_number )?;
    let item = required_field( &mut fields, "item id", line_number )?;
    let time = parse_timestamp( time )
	.ok_or_else( || Error::malformed( line_number, format!( "unreadable timestamp {time}" )))?;
    Ok( (session, item.to_string(), time) )
}

fn required_field<'a, I>( fields: &mut I, name: &str, line_number: usize ) -> Result<&'a str> where
    I: Iterator<Item = &'a str>,
{
    match fields.next() {
	Some( field ) if !field.is_empty() => Ok( field ),
	_ => Err( Error::malformed( line_number, format!( "missing {name}" ))),
    }
}

/// Milliseconds since the epoch, given either directly or as an RFC 3339 date
pub fn parse_timestamp( text: &str ) -> Option<Timestamp> {
    if let Ok( millis ) = text.parse::<Timestamp>() {
	return Some( millis )
    }
    DateTime::parse_from_rfc3339( text ).ok().map( |time| time.timestamp_millis() )
}

/// Creates a `session;item1,item2,...` line
pub fn format_prediction_line( session: &str, items: &[Item] ) -> String {
    format!( "{session};{}", items.join( "," ))
}

pub fn parse_prediction_line( line: &str, line_number: usize ) -> Result<(SessionId, Vec<Item>)> {
    let (session, items) = line.trim_end().split_once( ';' )
	.ok_or_else( || Error::malformed( line_number, "missing ';' after session id" ))?;
    if session.is_empty() {
	return Err( Error::malformed( line_number, "missing session id" ))
    }
    let items = items.split( ',' )
	.filter( |item| !item.is_empty() )
	.map( str::to_string )
	.collect();
    Ok( (session.to_string(), items) )
}

pub fn write_predictions( predictions: &Predictions, path: &str ) -> Result<()> {
    let file = File::create( Path::new( path ))?;
    let mut writer = BufWriter::new( file );
    for (session, items) in predictions {
	writeln!( writer, "{}", format_prediction_line( session, items ))?;
    }
    writer.flush()?;
    debug!( "Wrote {} predictions to {path}", predictions.len() );
    Ok( () )
}

pub fn read_predictions( path: &str ) -> Result<Predictions> {
    let reader = open( path )?;
    let mut predictions = Predictions::new();
    for (index, line) in reader.lines().enumerate() {
	let line = line?;
	if line.trim().is_empty() {
	    continue;
	}
	let (session, items) = parse_prediction_line( &line, index + 1 )?;
	predictions.insert( session, items );
    }
    Ok( predictions )
}

/// Writes serializeable model parameters to a file
pub fn write_parameters<P: Serialize>( parameters: &P, path: &str ) -> Result<()> {
    let file = File::create( Path::new( path ))?;
    let mut writer = BufWriter::new( file );
    serde_json::to_writer( &mut writer, parameters )?;
    writer.flush()?;
    Ok( () )
}

pub fn read_parameters<P: DeserializeOwned>( path: &str ) -> Result<P> {
    let parameters = serde_json::from_reader( open( path )? )?;
    Ok( parameters )
}

fn open( path: &str ) -> Result<BufReader<File>> {
    let file = File::open( Path::new( path ))?;
    Ok( BufReader::new( file ))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::model::{SequenceModel, SequenceParameters, NaiveBayesModel, NaiveBayesParameters};

    const CLICKS: &str = "\
1,2014-04-07T10:51:09.277Z,214536502,0
1,2014-04-07T10:54:09.868Z,214536500,0
2,2014-04-07T13:56:37.614Z,214662742,0

1,2014-04-07T10:52:00.000Z,214536506,S
";

    const BUYS: &str = "\
1,2014-04-07T11:00:00.000Z,214536502,12462,1
";

    #[test]
    fn test_read_logs() {
	let mut store = SessionStore::new();
	assert_eq!( read_clicks( Cursor::new( CLICKS ), &mut store ).unwrap(), 4 );
	assert_eq!( read_buys( Cursor::new( BUYS ), &mut store ).unwrap(), 1 );
	store.sort_clicks();

	assert_eq!( store.len(), 2 );
	let session = store.get( "1" ).unwrap();
	let items: Vec<&Item> = session.clicked_items().collect();
	assert_eq!( items, vec!( "214536502", "214536506", "214536500" ));
	assert_eq!( session.buys[ 0 ].item, "214536502" );
	assert!( session.buys[ 0 ].time > session.clicks[ 2 ].time );
    }

    #[test]
    fn test_parse_timestamp() {
	assert_eq!( parse_timestamp( "42" ), Some( 42 ));
	assert_eq!( parse_timestamp( "1970-01-01T00:00:01.500Z" ), Some( 1500 ));
	assert_eq!( parse_timestamp( "yesterday" ), None );
    }

    #[test]
    /// Broken records abort reading and name the line
    fn test_malformed_input() {
	let mut store = SessionStore::new();
	let log = "1,5,A\n1,6\n";
	match read_clicks( Cursor::new( log ), &mut store ) {
	    Err( Error::MalformedInput { line, reason } ) => {
		assert_eq!( line, 2 );
		assert!( reason.contains( "item id" ));
	    },
	    other => panic!( "expected malformed input, got {other:?}" ),
	}

	assert!( matches!( parse_event_line( "1,,A", 3 ), Err( Error::MalformedInput { line: 3, .. } )));
	assert!( matches!( parse_event_line( "1,soon,A", 4 ), Err( Error::MalformedInput { line: 4, .. } )));
    }

    #[test]
    fn test_prediction_lines() {
	let items = vec!( "A".to_string(), "B".to_string() );
	let line = format_prediction_line( "s1", &items );
	assert_eq!( line, "s1;A,B" );
	assert_eq!( parse_prediction_line( &format!( "{line}\n" ), 1 ).unwrap(), ("s1".to_string(), items) );
	assert!( parse_prediction_line( "s1 A,B", 2 ).is_err() );
    }

    #[test]
    fn test_prediction_file() {
	let directory = tempfile::tempdir().unwrap();
	let path = directory.path().join( "results" );
	let path = path.to_str().unwrap();

	let mut predictions = Predictions::new();
	predictions.insert( "11".to_string(), vec!( "A".to_string() ));
	predictions.insert( "7".to_string(), vec!( "B".to_string(), "C".to_string() ));
	write_predictions( &predictions, path ).unwrap();

	assert_eq!( std::fs::read_to_string( path ).unwrap(), "11;A\n7;B,C\n" );
	assert_eq!( read_predictions( path ).unwrap(), predictions );
    }

    #[test]
    /// Parameters survive the trip through a file, item ids with separators included
    fn test_parameter_file() {
	let mut store = SessionStore::new();
	store.add_click( "1", ClickEvent::new( "a_b", 1 ));
	store.add_click( "1", ClickEvent::new( "c", 2 ));
	store.add_click( "2", ClickEvent::new( "a", 1 ));
	store.add_click( "2", ClickEvent::new( "b_c", 2 ));
	store.add_buy( "1", BuyEvent::new( "c", 3 ));

	let directory = tempfile::tempdir().unwrap();
	let observer = SilentObserver;

	let mut sequence = SequenceModel::default();
	Trainer::new( &observer ).train( &store, &mut sequence ).unwrap();
	let path = directory.path().join( "sequence.json" );
	write_parameters( sequence.parameters(), path.to_str().unwrap() ).unwrap();
	let restored: SequenceParameters = read_parameters( path.to_str().unwrap() ).unwrap();
	assert_eq!( &restored, sequence.parameters() );
	assert_eq!( restored.pair( "a_b", "c" ), [[1, 2], [1, 1]] );
	assert_eq!( restored.pair( "a", "b_c" ), [[2, 1], [1, 1]] );

	let mut bayes = NaiveBayesModel::new();
	Trainer::new( &observer ).train( &store, &mut bayes ).unwrap();
	let path = directory.path().join( "bayes.json" );
	write_parameters( bayes.parameters(), path.to_str().unwrap() ).unwrap();
	let restored: NaiveBayesParameters = read_parameters( path.to_str().unwrap() ).unwrap();
	let restored = NaiveBayesModel::with_parameters( restored ).unwrap();
	let session = vec!( ClickEvent::new( "a_b", 1 ), ClickEvent::new( "c", 2 ));
	assert_eq!( restored.predict( &session ).unwrap(), bayes.predict( &session ).unwrap() );
    }

    #[test]
    fn test_missing_file() {
	assert!( matches!( read_sessions( "/nonexistent/clicks.dat", None ), Err( Error::Io( _ ))));
    }
}
