/*
 * vinmail embeddable SMTP receiver
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use crate::receiver::test_helpers::TestReceiver;
use crate::{middleware::handler, test_receiver};

#[tokio::test]
async fn rset_discards_the_open_transaction() {
    test_receiver! {
        on_mail => handler(|envelope| {
            assert_eq!(
                envelope.mail_from.as_ref().map(ToString::to_string),
                Some("second@x".to_string())
            );
            assert_eq!(envelope.rcpt_to.len(), 1);
            None
        }),
        [
            "HELO foobar\r\n",
            "MAIL FROM:<first@x>\r\n",
            "RCPT TO:<gone@y>\r\n",
            "RSET\r\n",
            "MAIL FROM:<second@x>\r\n",
            "RCPT TO:<kept@y>\r\n",
            "DATA\r\n",
            ".\r\n",
        ]
        .concat(),
        [
            "250 testserver.com Hello\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.5 OK\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.5 OK\r\n",
            "354 Enter message, ending with '.' on a line by itself\r\n",
            "250 2.0.0 Message accepted\r\n",
        ]
        .concat()
    };
}

#[tokio::test]
async fn double_rset_is_single_rset() {
    test_receiver! {
        [
            "HELO foobar\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RSET\r\n",
            "RSET\r\n",
            "MAIL FROM:<b@x>\r\n",
        ]
        .concat(),
        [
            "250 testserver.com Hello\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.0 OK\r\n",
        ]
        .concat()
    };
}

#[tokio::test]
async fn two_messages_on_one_connection() {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let seen = counter.clone();

    let (_, session) = TestReceiver {
        handler: handler(move |envelope| {
            match seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                0 => {
                    assert_eq!(
                        envelope.mail_from.as_ref().map(ToString::to_string),
                        Some("john@doe".to_string())
                    );
                    assert_eq!(envelope.data.bytes(), b"mail one");
                }
                1 => {
                    assert_eq!(
                        envelope.mail_from.as_ref().map(ToString::to_string),
                        Some("john2@doe".to_string())
                    );
                    assert_eq!(envelope.data.bytes(), b"mail two");
                }
                _ => panic!("only two messages were sent"),
            }
            None
        }),
        ..Default::default()
    }
    .exchange(
        &[
            "HELO foobar\r\n",
            "MAIL FROM:<john@doe>\r\n",
            "RCPT TO:<aa@bb>\r\n",
            "DATA\r\n",
            "mail one\r\n",
            ".\r\n",
            "MAIL FROM:<john2@doe>\r\n",
            "RCPT TO:<aa2@bb>\r\n",
            "DATA\r\n",
            "mail two\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
    )
    .await;

    assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(session.messages_sent, 2);
}

#[tokio::test]
async fn each_transaction_has_a_fresh_envelope_id() {
    let ids = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = ids.clone();

    TestReceiver {
        handler: handler(move |envelope| {
            sink.lock().unwrap().push(envelope.envelope_id().to_string());
            None
        }),
        ..Default::default()
    }
    .exchange(
        &[
            "HELO foobar\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "DATA\r\n",
            ".\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "DATA\r\n",
            ".\r\n",
        ]
        .concat(),
    )
    .await;

    let ids = ids.lock().unwrap();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}
