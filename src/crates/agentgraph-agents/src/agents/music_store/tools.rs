//! Catalogue and invoice lookups for the music store subagents
//!
//! Every query is parameterised. Invoice tools never take the customer
//! from the model: they read the verified id from the [`ToolContext`].

use crate::error::{AgentError, Result};
use crate::sql::SqlDatabase;
use crate::tools::{integer_param, object_schema, str_arg, string_param, Tool, ToolContext, ToolRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Context key holding the verified customer id
pub const CUSTOMER_ID: &str = "customer_id";

/// Context key holding the formatted saved preferences
pub const LOADED_MEMORY: &str = "loaded_memory";

const ALBUMS_BY_ARTIST_SQL: &str = "SELECT Album.Title, Artist.Name FROM Album \
     JOIN Artist ON Album.ArtistId = Artist.ArtistId \
     WHERE Artist.Name LIKE '%' || ? || '%'";

const TRACKS_BY_ARTIST_SQL: &str = "SELECT Track.Name AS SongName, Artist.Name AS ArtistName FROM Album \
     LEFT JOIN Artist ON Album.ArtistId = Artist.ArtistId \
     LEFT JOIN Track ON Track.AlbumId = Album.AlbumId \
     WHERE Artist.Name LIKE '%' || ? || '%'";

const SONGS_BY_GENRE_SQL: &str = "SELECT Track.Name AS SongName, Artist.Name AS ArtistName FROM Track \
     LEFT JOIN Album ON Track.AlbumId = Album.AlbumId \
     LEFT JOIN Artist ON Album.ArtistId = Artist.ArtistId \
     WHERE Track.GenreId IN (SELECT GenreId FROM Genre WHERE Name LIKE '%' || ? || '%') \
     GROUP BY Artist.Name \
     LIMIT 8";

const CHECK_FOR_SONGS_SQL: &str = "SELECT * FROM Track WHERE Name LIKE '%' || ? || '%'";

const INVOICES_BY_DATE_SQL: &str = "SELECT * FROM Invoice WHERE CustomerId = ? ORDER BY InvoiceDate DESC";

const INVOICES_BY_UNIT_PRICE_SQL: &str = "SELECT Invoice.*, InvoiceLine.UnitPrice FROM Invoice \
     JOIN InvoiceLine ON Invoice.InvoiceId = InvoiceLine.InvoiceId \
     WHERE Invoice.CustomerId = ? \
     ORDER BY InvoiceLine.UnitPrice DESC";

const EMPLOYEE_BY_INVOICE_SQL: &str = "SELECT Employee.FirstName, Employee.Title, Employee.Email FROM Employee \
     JOIN Customer ON Customer.SupportRepId = Employee.EmployeeId \
     JOIN Invoice ON Invoice.CustomerId = Customer.CustomerId \
     WHERE Invoice.InvoiceId = ? AND Invoice.CustomerId = ?";

/// Which lookup a [`CatalogTool`] runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogLookup {
    AlbumsByArtist,
    TracksByArtist,
    SongsByGenre,
    CheckForSongs,
}

impl CatalogLookup {
    fn name(self) -> &'static str {
        match self {
            Self::AlbumsByArtist => "get_albums_by_artist",
            Self::TracksByArtist => "get_tracks_by_artist",
            Self::SongsByGenre => "get_songs_by_genre",
            Self::CheckForSongs => "check_for_songs",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::AlbumsByArtist => "Get albums by an artist.",
            Self::TracksByArtist => "Get songs by an artist (or similar artists).",
            Self::SongsByGenre => {
                "Fetch songs from the database that match a specific genre. Returns a list of songs that match the specified genre."
            }
            Self::CheckForSongs => "Check if a song exists by its name.",
        }
    }

    fn param(self) -> (&'static str, &'static str) {
        match self {
            Self::AlbumsByArtist | Self::TracksByArtist => ("artist", "Name of the artist"),
            Self::SongsByGenre => ("genre", "The genre of the songs to fetch"),
            Self::CheckForSongs => ("song_title", "Title of the song"),
        }
    }
}

/// Read-only lookup in the music catalogue
pub struct CatalogTool {
    db: Arc<dyn SqlDatabase>,
    lookup: CatalogLookup,
}

impl CatalogTool {
    pub fn new(db: Arc<dyn SqlDatabase>, lookup: CatalogLookup) -> Self {
        Self { db, lookup }
    }
}

#[async_trait]
impl Tool for CatalogTool {
    fn name(&self) -> &str {
        self.lookup.name()
    }

    fn description(&self) -> &str {
        self.lookup.description()
    }

    fn parameters(&self) -> Value {
        let (param, description) = self.lookup.param();
        object_schema([(param, string_param(description))])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let (param, _) = self.lookup.param();
        let term = str_arg(&args, param)?;
        let params = [json!(term)];
        match self.lookup {
            CatalogLookup::AlbumsByArtist => Ok(self.db.run_with(ALBUMS_BY_ARTIST_SQL, &params).await?.render(true)),
            CatalogLookup::TracksByArtist => Ok(self.db.run_with(TRACKS_BY_ARTIST_SQL, &params).await?.render(true)),
            CatalogLookup::CheckForSongs => Ok(self.db.run_with(CHECK_FOR_SONGS_SQL, &params).await?.render(true)),
            CatalogLookup::SongsByGenre => {
                let result = self.db.run_with(SONGS_BY_GENRE_SQL, &params).await?;
                if result.is_empty() {
                    return Ok(format!("No songs found for the genre: {}", term));
                }
                let songs: Vec<Value> = result
                    .records()
                    .into_iter()
                    .map(|row| json!({"Song": row["SongName"], "Artist": row["ArtistName"]}))
                    .collect();
                Ok(serde_json::to_string(&songs)?)
            }
        }
    }
}

/// Which lookup an [`InvoiceTool`] runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceLookup {
    SortedByDate,
    SortedByUnitPrice,
    EmployeeByInvoice,
}

/// Invoice lookup for the verified customer
pub struct InvoiceTool {
    db: Arc<dyn SqlDatabase>,
    lookup: InvoiceLookup,
}

impl InvoiceTool {
    pub fn new(db: Arc<dyn SqlDatabase>, lookup: InvoiceLookup) -> Self {
        Self { db, lookup }
    }
}

#[async_trait]
impl Tool for InvoiceTool {
    fn name(&self) -> &str {
        match self.lookup {
            InvoiceLookup::SortedByDate => "get_invoices_by_customer_sorted_by_date",
            InvoiceLookup::SortedByUnitPrice => "get_invoices_sorted_by_unit_price",
            InvoiceLookup::EmployeeByInvoice => "get_employee_by_invoice_and_customer",
        }
    }

    fn description(&self) -> &str {
        match self.lookup {
            InvoiceLookup::SortedByDate => {
                "Look up all invoices for the verified customer. The invoices are sorted in descending order by invoice date, which helps when the customer wants to view their most recent/oldest invoice, or if they want to view invoices within a specific date range."
            }
            InvoiceLookup::SortedByUnitPrice => {
                "Use this tool when the customer wants to know the details of one of their invoices based on the unit price/cost of the invoice. Returns all invoices of the verified customer, sorted by unit price from highest to lowest."
            }
            InvoiceLookup::EmployeeByInvoice => {
                "Find the employee associated with an invoice of the verified customer. Returns the first name, title and email of the employee."
            }
        }
    }

    fn parameters(&self) -> Value {
        match self.lookup {
            InvoiceLookup::EmployeeByInvoice => {
                object_schema([("invoice_id", integer_param("The ID of the specific invoice"))])
            }
            _ => json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let customer_id = verified_customer(ctx)?;
        match self.lookup {
            InvoiceLookup::SortedByDate => Ok(self
                .db
                .run_with(INVOICES_BY_DATE_SQL, &[json!(customer_id)])
                .await?
                .render(true)),
            InvoiceLookup::SortedByUnitPrice => Ok(self
                .db
                .run_with(INVOICES_BY_UNIT_PRICE_SQL, &[json!(customer_id)])
                .await?
                .render(true)),
            InvoiceLookup::EmployeeByInvoice => {
                let invoice_id = args
                    .get("invoice_id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| AgentError::InvalidInput("invoice_id must be an integer".into()))?;
                let result = self
                    .db
                    .run_with(EMPLOYEE_BY_INVOICE_SQL, &[json!(invoice_id), json!(customer_id)])
                    .await?;
                if result.is_empty() {
                    return Ok(format!(
                        "No employee found for invoice ID {} and customer identifier {}.",
                        invoice_id, customer_id
                    ));
                }
                Ok(result.render(true))
            }
        }
    }
}

fn verified_customer(ctx: &ToolContext) -> Result<i64> {
    let id: String = ctx.require(CUSTOMER_ID)?;
    id.trim()
        .parse()
        .map_err(|_| AgentError::InvalidInput(format!("customer id '{}' is not a number", id)))
}

/// The four catalogue tools
pub fn catalog_tools(db: &Arc<dyn SqlDatabase>) -> ToolRegistry {
    [
        CatalogLookup::AlbumsByArtist,
        CatalogLookup::TracksByArtist,
        CatalogLookup::SongsByGenre,
        CatalogLookup::CheckForSongs,
    ]
    .into_iter()
    .map(|lookup| Arc::new(CatalogTool::new(Arc::clone(db), lookup)) as Arc<dyn Tool>)
    .collect()
}

/// The three invoice tools
pub fn invoice_tools(db: &Arc<dyn SqlDatabase>) -> ToolRegistry {
    [
        InvoiceLookup::SortedByDate,
        InvoiceLookup::SortedByUnitPrice,
        InvoiceLookup::EmployeeByInvoice,
    ]
    .into_iter()
    .map(|lookup| Arc::new(InvoiceTool::new(Arc::clone(db), lookup)) as Arc<dyn Tool>)
    .collect()
}

/// Resolve a customer id, phone number (leading `+`) or email address
///
/// Returns `None` when no customer matches.
pub async fn customer_id_from_identifier(db: &dyn SqlDatabase, identifier: &str) -> Result<Option<String>> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Ok(None);
    }
    if identifier.chars().all(|c| c.is_ascii_digit()) {
        return Ok(Some(identifier.to_string()));
    }
    let column = if identifier.starts_with('+') {
        "Phone"
    } else if identifier.contains('@') {
        "Email"
    } else {
        return Ok(None);
    };
    let sql = format!("SELECT CustomerId FROM Customer WHERE {} = ?", column);
    let result = db.run_with(&sql, &[json!(identifier)]).await?;
    Ok(result.rows.first().and_then(|row| row.first()).map(|id| match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }))
}
