//! Builders turning request contracts into protocol messages.

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    chatgate_protocol::{
        ContextInfo, Jid, Message, UploadResponse,
        message::{
            ContactMessage, ContactsArrayMessage, ExtendedTextMessage, FutureProofMessage,
            ListMessage, ListRow, ListSection, ListType, LocationMessage, MediaMessage,
            MessageContextInfo, MessageKey, PollCreationMessage, PollOption, PreviewType,
            ReactionMessage,
        },
    },
    chrono::Utc,
};

use crate::{
    contract::{Contact, Link, List, Location, MediaAttributes, MediaType, Poll, Reaction},
    error::{Error, Result},
    preview::OpenGraph,
};

pub fn text(text: &str, context_info: Option<ContextInfo>) -> Message {
    Message {
        extended_text_message: Some(ExtendedTextMessage {
            text: text.to_string(),
            context_info,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Extended text carrying a link preview. Explicit title and description
/// override the scraped ones.
pub fn link(
    request: &Link,
    og: &OpenGraph,
    thumbnail: Option<&[u8]>,
    context_info: Option<ContextInfo>,
) -> Message {
    let text = match request.text.as_deref().filter(|t| !t.is_empty()) {
        Some(extra) => format!("{}\n\n{extra}", request.link),
        None => request.link.clone(),
    };
    let title = request
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| og.title().map(str::to_string));
    let description = request
        .description
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| og.description().map(str::to_string));
    let (thumbnail_width, thumbnail_height) = og.image_size().unzip();

    Message {
        extended_text_message: Some(ExtendedTextMessage {
            text,
            title,
            description,
            canonical_url: Some(request.link.clone()),
            matched_text: Some(request.link.clone()),
            preview_type: Some(PreviewType::Image),
            jpeg_thumbnail: thumbnail.map(|b| STANDARD.encode(b)),
            thumbnail_width,
            thumbnail_height,
            context_info,
        }),
        ..Default::default()
    }
}

/// Fail early for attribute combinations no upload can satisfy.
pub fn check_media(attributes: &MediaAttributes) -> Result<()> {
    if attributes.media_type == MediaType::Document
        && attributes.filename.as_deref().is_none_or(str::is_empty)
    {
        return Err(Error::validation(
            "the 'filename' is required for the 'document' type",
        ));
    }
    Ok(())
}

/// Media descriptor for an uploaded blob.
pub fn media(
    attributes: &MediaAttributes,
    mimetype: &str,
    upload: UploadResponse,
    context_info: Option<ContextInfo>,
) -> Result<Message> {
    check_media(attributes)?;

    let caption = attributes.caption.clone().filter(|c| !c.is_empty());
    let mut descriptor = MediaMessage {
        url: upload.url,
        direct_path: upload.direct_path,
        media_key: upload.media_key,
        file_enc_sha256: upload.file_enc_sha256,
        file_sha256: upload.file_sha256,
        file_length: upload.file_length,
        mimetype: mimetype.to_string(),
        context_info,
        ..Default::default()
    };

    let mut message = Message::default();
    match attributes.media_type {
        MediaType::Image => {
            descriptor.caption = caption;
            message.image_message = Some(descriptor);
        },
        MediaType::Video => {
            descriptor.caption = caption;
            descriptor.gif_playback = Some(attributes.gif_playback);
            message.video_message = Some(descriptor);
        },
        MediaType::Ptv => {
            descriptor.caption = caption;
            descriptor.gif_playback = Some(attributes.gif_playback);
            message.ptv_message = Some(descriptor);
        },
        MediaType::Sticker => message.sticker_message = Some(descriptor),
        MediaType::Audio => {
            descriptor.ptt = Some(true);
            message.audio_message = Some(descriptor);
        },
        MediaType::Document => {
            descriptor.caption = caption;
            descriptor.file_name = attributes.filename.clone();
            message.document_message = Some(descriptor);
        },
    }
    Ok(message)
}

pub fn maps_url(latitude: f64, longitude: f64) -> String {
    format!("https://www.google.com/maps/search/?api=1&query={latitude:.6},{longitude:.6}")
}

pub fn location(location: &Location, context_info: Option<ContextInfo>) -> Message {
    Message {
        location_message: Some(LocationMessage {
            degrees_latitude: location.latitude,
            degrees_longitude: location.longitude,
            name: location.name.clone(),
            address: location.address.clone(),
            comment: location.comment.clone(),
            url: Some(maps_url(location.latitude, location.longitude)),
            context_info,
        }),
        ..Default::default()
    }
}

pub fn vcard(contact: &Contact) -> String {
    format!(
        "BEGIN:VCARD\nVERSION:3.0\nFN:{}\nitem1.TEL;waid={}:{}\nitem1.X-ABLabel:Celular\nEND:VCARD",
        contact.full_name, contact.raw_number, contact.phone_number
    )
}

/// One contact card, or a contact array for several. Array labels are in
/// Portuguese for Brazilian recipients.
pub fn contacts(
    contacts: &[Contact],
    recipient: &str,
    context_info: Option<ContextInfo>,
) -> Result<Message> {
    let (first, rest) = contacts
        .split_first()
        .ok_or_else(|| Error::validation("at least one contact is required"))?;
    for (i, contact) in contacts.iter().enumerate() {
        if contacts[..i].contains(contact) {
            return Err(Error::validation(format!(
                "duplicate contact '{}'",
                contact.full_name
            )));
        }
    }

    if rest.is_empty() {
        return Ok(Message {
            contact_message: Some(ContactMessage {
                display_name: first.full_name.clone(),
                vcard: vcard(first),
                context_info,
            }),
            ..Default::default()
        });
    }

    let label = if recipient.starts_with("55") {
        "contatos"
    } else {
        "contacts"
    };
    Ok(Message {
        contacts_array_message: Some(ContactsArrayMessage {
            display_name: format!("{} {label}", contacts.len()),
            contacts: contacts
                .iter()
                .map(|c| ContactMessage {
                    display_name: c.full_name.clone(),
                    vcard: vcard(c),
                    context_info: None,
                })
                .collect(),
            context_info,
        }),
        ..Default::default()
    })
}

/// Single-select list wrapped in a view-once envelope.
pub fn list(list: &List, context_info: Option<ContextInfo>) -> Result<Message> {
    if list.sections.is_empty() {
        return Err(Error::validation("a list needs at least one section"));
    }
    if let Some(section) = list.sections.iter().find(|s| s.rows.is_empty()) {
        return Err(Error::validation(format!(
            "section '{}' has no rows",
            section.title
        )));
    }

    let sections = list
        .sections
        .iter()
        .map(|s| ListSection {
            title: s.title.clone(),
            rows: s
                .rows
                .iter()
                .map(|r| ListRow {
                    title: r.title.clone(),
                    description: r.description.clone(),
                    row_id: r.row_id.clone(),
                })
                .collect(),
        })
        .collect();

    let inner = Message {
        list_message: Some(ListMessage {
            title: list.title.clone(),
            description: list.description.clone(),
            button_text: list.button_text.clone(),
            footer_text: list.footer_text.clone(),
            list_type: ListType::SingleSelect,
            sections,
            context_info,
        }),
        ..Default::default()
    };
    Ok(Message {
        view_once_message_v2: Some(FutureProofMessage {
            message: Box::new(inner),
        }),
        ..Default::default()
    })
}

/// Poll creation with a fresh encryption secret.
pub fn poll(poll: &Poll, secret: &[u8], context_info: Option<ContextInfo>) -> Result<Message> {
    if poll.options.len() < 2 {
        return Err(Error::validation("a poll needs at least two options"));
    }
    for (i, option) in poll.options.iter().enumerate() {
        if poll.options[..i].contains(option) {
            return Err(Error::validation(format!("duplicate poll option '{option}'")));
        }
    }
    let selectable = match poll.selectable_options_count {
        0 => 1,
        n => n,
    };
    if selectable as usize > poll.options.len() {
        return Err(Error::validation(format!(
            "selectableOptionsCount {selectable} exceeds the {} options",
            poll.options.len()
        )));
    }

    let secret = STANDARD.encode(secret);
    Ok(Message {
        poll_creation_message_v3: Some(PollCreationMessage {
            name: poll.name.clone(),
            options: poll
                .options
                .iter()
                .map(|o| PollOption {
                    option_name: o.clone(),
                })
                .collect(),
            selectable_options_count: selectable,
            enc_key: secret.clone(),
            context_info,
        }),
        message_context_info: Some(MessageContextInfo {
            device_list_metadata_version: 2,
            message_secret: Some(secret),
        }),
        ..Default::default()
    })
}

pub fn reaction(chat: Jid, message_id: &str, from_me: bool, reaction: &Reaction) -> Message {
    Message {
        reaction_message: Some(ReactionMessage {
            key: MessageKey {
                remote_jid: chat,
                from_me,
                id: message_id.to_string(),
                participant: None,
            },
            text: reaction.reaction.clone(),
            sender_timestamp_ms: Utc::now().timestamp_millis(),
        }),
        ..Default::default()
    }
}
