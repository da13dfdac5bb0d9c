#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SourceRow {
	pub id: String,
	pub tenant_id: String,
	pub name: String,
	pub email_address: Option<String>,
	pub kind: String,
	pub file_name: Option<String>,
	pub status: String,
	pub expected: i64,
	pub succeeded: i64,
	pub failed: i64,
	pub included_in_search: bool,
	pub error: Option<String>,
	pub started_at: Option<String>,
	pub completed_at: Option<String>,
	pub created_at: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MessageRow {
	pub id: String,
	pub tenant_id: String,
	pub source_id: Option<String>,
	pub message_id: String,
	pub thread_id: Option<String>,
	pub subject: String,
	pub body_text: String,
	pub body_html: Option<String>,
	pub sent_at: String,
	pub from_contact_id: String,
	pub has_attachments: bool,
	pub created_at: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ContactRow {
	pub id: String,
	pub tenant_id: String,
	pub email: String,
	pub name: Option<String>,
	pub company_id: Option<String>,
	pub first_seen: Option<String>,
	pub last_seen: Option<String>,
	pub email_count: i64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct CompanyRow {
	pub id: String,
	pub tenant_id: String,
	pub domain: String,
	pub name: Option<String>,
	pub total_emails: i64,
	pub first_contact: Option<String>,
	pub last_contact: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AttachmentRow {
	pub id: String,
	pub message_id: String,
	pub filename: String,
	pub content_type: String,
	pub size: i64,
	pub blob_key: String,
	pub created_at: String,
}
